//! Reconciliation passes between the record store and the mirror.

use crate::config::SyncConfig;
use crate::error::{per_record, RecordFailure, SyncResult};
use crate::outcome::{PassCounts, PassReport, RecordOutcome, SkipReason};
use crate::projection::{
    company_document, history_document, history_key, initial_status, is_pending, local_id,
    parameter_document, parse_history, parse_report, pending_queries, report_document, report_key,
    status_patch, sync_ack, user_document, CompanyRef, ReportContext, ReportRef,
};
use chrono::Utc;
use lalantsika_mirror::{KeyedDocument, RemoteMirror, RemoteResult};
use lalantsika_model::{
    current_status, Company, CompanySnapshot, Document, Entity, EntityKind, Parameter, Record,
    RecordId, Report, StatusHistoryEntry, StatusSnapshot, User, UserSnapshot,
};
use lalantsika_store::{JsonFileStore, MemoryStore, RecordStore};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

/// One record store per entity kind.
#[derive(Clone)]
pub struct Stores {
    /// Users.
    pub users: Arc<dyn RecordStore<User>>,
    /// Companies.
    pub companies: Arc<dyn RecordStore<Company>>,
    /// Road reports.
    pub reports: Arc<dyn RecordStore<Report>>,
    /// Status history.
    pub history: Arc<dyn RecordStore<StatusHistoryEntry>>,
    /// Parameters.
    pub parameters: Arc<dyn RecordStore<Parameter>>,
}

impl Stores {
    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(MemoryStore::<User>::new()),
            companies: Arc::new(MemoryStore::<Company>::new()),
            reports: Arc::new(MemoryStore::<Report>::new()),
            history: Arc::new(MemoryStore::<StatusHistoryEntry>::new()),
            parameters: Arc::new(MemoryStore::<Parameter>::new()),
        }
    }

    /// JSON table files inside `dir`, one per kind.
    ///
    /// # Errors
    ///
    /// Fails if a table file cannot be created or parsed.
    pub fn open_json(dir: &Path) -> SyncResult<Self> {
        Ok(Self {
            users: Arc::new(JsonFileStore::<User>::open(dir)?),
            companies: Arc::new(JsonFileStore::<Company>::open(dir)?),
            reports: Arc::new(JsonFileStore::<Report>::open(dir)?),
            history: Arc::new(JsonFileStore::<StatusHistoryEntry>::open(dir)?),
            parameters: Arc::new(JsonFileStore::<Parameter>::open(dir)?),
        })
    }

    /// Dirty records per kind.
    ///
    /// # Errors
    ///
    /// Fails if any store is unreachable.
    pub fn pending_counts(&self) -> SyncResult<BTreeMap<EntityKind, usize>> {
        let mut pending = BTreeMap::new();
        pending.insert(EntityKind::User, self.users.count_unsynchronized()?);
        pending.insert(EntityKind::Company, self.companies.count_unsynchronized()?);
        pending.insert(EntityKind::Report, self.reports.count_unsynchronized()?);
        pending.insert(
            EntityKind::StatusHistory,
            self.history.count_unsynchronized()?,
        );
        pending.insert(
            EntityKind::Parameter,
            self.parameters.count_unsynchronized()?,
        );
        Ok(pending)
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Result of [`SyncEngine::delete_mirrored`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    /// Local records removed, dependents included.
    pub deleted: usize,
    /// Mirror deletes that were not confirmed. The local delete went
    /// ahead regardless.
    pub mirror_failures: Vec<RecordFailure>,
}

/// Runs one-directional reconciliation passes per entity kind.
///
/// Passes for the same kind are serialized; passes for different kinds may
/// run concurrently. Each pass works on the snapshot of dirty records (or
/// pending documents) taken when it starts.
pub struct SyncEngine<M: RemoteMirror> {
    config: SyncConfig,
    stores: Stores,
    mirror: M,
    pass_locks: [Mutex<()>; 5],
}

impl<M: RemoteMirror> SyncEngine<M> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, stores: Stores, mirror: M) -> Self {
        Self {
            config,
            stores,
            mirror,
            pass_locks: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the record stores.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Gets the mirror.
    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    /// Probes the mirror.
    pub fn is_remote_available(&self) -> bool {
        self.mirror.is_available()
    }

    /// Pushes dirty users.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn push_users(&self) -> SyncResult<PassReport> {
        self.push_pass(&*self.stores.users, |r| Ok(self.publish_user(r)))
    }

    /// Pushes dirty companies.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn push_companies(&self) -> SyncResult<PassReport> {
        self.push_pass(&*self.stores.companies, |r| Ok(self.publish_company(r)))
    }

    /// Pushes dirty reports with their embedded reporter, company and
    /// current status.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn push_reports(&self) -> SyncResult<PassReport> {
        self.push_pass(&*self.stores.reports, |r| self.publish_report(r))
    }

    /// Pushes dirty status history entries, republishing each affected
    /// report so its current status follows.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn push_status_history(&self) -> SyncResult<PassReport> {
        let mut republished = HashSet::new();
        self.push_pass(&*self.stores.history, |r| {
            self.publish_history(r, &mut republished)
        })
    }

    /// Pushes dirty parameters.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn push_parameters(&self) -> SyncResult<PassReport> {
        self.push_pass(&*self.stores.parameters, |r| Ok(self.publish_parameter(r)))
    }

    /// Pulls reports the mobile app wrote or edited in the mirror.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn pull_reports(&self) -> SyncResult<PassReport> {
        let _pass = self.pass_locks[EntityKind::Report.index()].lock();
        let collection = &self.config.collections.reports;
        let pending = match self.pending_documents(EntityKind::Report, collection) {
            Ok(pending) => pending,
            Err(reason) => return Ok(PassReport::Skipped { reason }),
        };

        let mut counts = PassCounts::default();
        for (key, doc) in &pending {
            let outcome = self.pull_report(collection, key, doc)?;
            log_pulled(EntityKind::Report, key, &outcome);
            counts.record(&outcome);
        }
        log_pass(EntityKind::Report, "pull", &counts);
        Ok(PassReport::Completed(counts))
    }

    /// Pulls status transitions written in the mirror, then refreshes the
    /// current status embedded in each affected report document.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn pull_status_history(&self) -> SyncResult<PassReport> {
        let _pass = self.pass_locks[EntityKind::StatusHistory.index()].lock();
        let collection = &self.config.collections.history;
        let pending = match self.pending_documents(EntityKind::StatusHistory, collection) {
            Ok(pending) => pending,
            Err(reason) => return Ok(PassReport::Skipped { reason }),
        };

        let mut counts = PassCounts::default();
        let mut touched = BTreeSet::new();
        for (key, doc) in &pending {
            let outcome = self.pull_history_entry(collection, key, doc, &mut touched)?;
            log_pulled(EntityKind::StatusHistory, key, &outcome);
            counts.record(&outcome);
        }
        for report_id in touched {
            self.refresh_report_status(report_id)?;
        }
        log_pass(EntityKind::StatusHistory, "pull", &counts);
        Ok(PassReport::Completed(counts))
    }

    /// Write-through for one record right after a local mutation.
    ///
    /// A failure leaves the record dirty for the next pass.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn push_one(&self, kind: EntityKind, id: RecordId) -> SyncResult<RecordOutcome> {
        if !self.mirror.is_available() {
            tracing::warn!(%kind, %id, "remote mirror unavailable, record stays dirty");
            return Ok(RecordOutcome::Failed(RecordFailure::RemoteUnavailable));
        }
        match kind {
            EntityKind::User => {
                self.push_single(&*self.stores.users, id, |r| Ok(self.publish_user(r)))
            }
            EntityKind::Company => {
                self.push_single(&*self.stores.companies, id, |r| Ok(self.publish_company(r)))
            }
            EntityKind::Report => {
                self.push_single(&*self.stores.reports, id, |r| self.publish_report(r))
            }
            EntityKind::StatusHistory => {
                let mut republished = HashSet::new();
                self.push_single(&*self.stores.history, id, |r| {
                    self.publish_history(r, &mut republished)
                })
            }
            EntityKind::Parameter => self.push_single(&*self.stores.parameters, id, |r| {
                Ok(self.publish_parameter(r))
            }),
        }
    }

    /// Deletes a record from the mirror, then locally.
    ///
    /// The local delete is authoritative and proceeds even when the mirror
    /// delete fails. Deleting a report also deletes its status history;
    /// deleting a history entry refreshes its report's current status.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn delete_mirrored(&self, kind: EntityKind, id: RecordId) -> SyncResult<DeleteOutcome> {
        let collections = &self.config.collections;
        let mut outcome = DeleteOutcome {
            deleted: 0,
            mirror_failures: Vec::new(),
        };

        match kind {
            EntityKind::User => {
                self.delete_pair(&*self.stores.users, &collections.users, id, None, &mut outcome)?
            }
            EntityKind::Company => self.delete_pair(
                &*self.stores.companies,
                &collections.companies,
                id,
                None,
                &mut outcome,
            )?,
            EntityKind::Parameter => self.delete_pair(
                &*self.stores.parameters,
                &collections.parameters,
                id,
                None,
                &mut outcome,
            )?,
            EntityKind::Report => {
                let entries = self
                    .stores
                    .history
                    .find_where(&|h| h.fields.report_id == id)?;
                for entry in &entries {
                    self.delete_pair(
                        &*self.stores.history,
                        &collections.history,
                        entry.id,
                        Some(history_key(entry)),
                        &mut outcome,
                    )?;
                }
                let key = self.stores.reports.get(id)?.map(|r| report_key(&r));
                self.delete_pair(
                    &*self.stores.reports,
                    &collections.reports,
                    id,
                    key,
                    &mut outcome,
                )?;
            }
            EntityKind::StatusHistory => {
                let entry = self.stores.history.get(id)?;
                let key = entry.as_ref().map(history_key);
                self.delete_pair(
                    &*self.stores.history,
                    &collections.history,
                    id,
                    key,
                    &mut outcome,
                )?;
                if let Some(entry) = entry {
                    self.refresh_report_status(entry.fields.report_id)?;
                }
            }
        }
        Ok(outcome)
    }

    // --- local -> remote ---

    fn push_pass<E, F>(&self, store: &dyn RecordStore<E>, mut publish: F) -> SyncResult<PassReport>
    where
        E: Entity,
        F: FnMut(&Record<E>) -> SyncResult<Result<(), RecordFailure>>,
    {
        let kind = E::KIND;
        let _pass = self.pass_locks[kind.index()].lock();
        if !self.mirror.is_available() {
            tracing::warn!(%kind, "remote mirror unavailable, skipping push");
            return Ok(PassReport::remote_unavailable());
        }

        let dirty = store.find_unsynchronized()?;
        let mut counts = PassCounts::default();
        for record in &dirty {
            let outcome = self.push_record(store, record, &mut publish)?;
            counts.record(&outcome);
        }
        log_pass(kind, "push", &counts);
        Ok(PassReport::Completed(counts))
    }

    fn push_single<E, F>(
        &self,
        store: &dyn RecordStore<E>,
        id: RecordId,
        mut publish: F,
    ) -> SyncResult<RecordOutcome>
    where
        E: Entity,
        F: FnMut(&Record<E>) -> SyncResult<Result<(), RecordFailure>>,
    {
        match store.get(id)? {
            Some(record) => self.push_record(store, &record, &mut publish),
            None => Ok(RecordOutcome::Vanished),
        }
    }

    fn push_record<E, F>(
        &self,
        store: &dyn RecordStore<E>,
        record: &Record<E>,
        publish: &mut F,
    ) -> SyncResult<RecordOutcome>
    where
        E: Entity,
        F: FnMut(&Record<E>) -> SyncResult<Result<(), RecordFailure>>,
    {
        if let Err(failure) = publish(record)? {
            tracing::error!(
                kind = %E::KIND,
                id = %record.id,
                error = %failure,
                "mirror write failed, record stays dirty"
            );
            return Ok(RecordOutcome::Failed(failure));
        }
        self.confirm(store, record)
    }

    /// Marks `record` clean unless it changed since it was read.
    fn confirm<E: Entity>(
        &self,
        store: &dyn RecordStore<E>,
        record: &Record<E>,
    ) -> SyncResult<RecordOutcome> {
        if store.mark_synchronized_at(record.id, record.revision, Utc::now())? {
            tracing::debug!(kind = %E::KIND, id = %record.id, "record synchronized");
            return Ok(RecordOutcome::Synced);
        }
        match store.get(record.id)? {
            None => Ok(RecordOutcome::Vanished),
            Some(_) => {
                tracing::debug!(
                    kind = %E::KIND,
                    id = %record.id,
                    "record changed during mirror write, stays dirty"
                );
                Ok(RecordOutcome::Failed(RecordFailure::Superseded {
                    kind: E::KIND,
                    id: record.id,
                }))
            }
        }
    }

    fn publish_user(&self, record: &Record<User>) -> Result<(), RecordFailure> {
        self.put(
            &self.config.collections.users,
            &record.id.to_string(),
            &user_document(record, Utc::now()),
        )
    }

    fn publish_company(&self, record: &Record<Company>) -> Result<(), RecordFailure> {
        self.put(
            &self.config.collections.companies,
            &record.id.to_string(),
            &company_document(record, Utc::now()),
        )
    }

    fn publish_parameter(&self, record: &Record<Parameter>) -> Result<(), RecordFailure> {
        self.put(
            &self.config.collections.parameters,
            &record.id.to_string(),
            &parameter_document(record, Utc::now()),
        )
    }

    fn publish_report(&self, record: &Record<Report>) -> SyncResult<Result<(), RecordFailure>> {
        let context = self.report_context(record)?;
        Ok(self.put(
            &self.config.collections.reports,
            &report_key(record),
            &report_document(record, &context, Utc::now()),
        ))
    }

    /// Writes the entry, then republishes its report once per pass.
    fn publish_history(
        &self,
        record: &Record<StatusHistoryEntry>,
        republished: &mut HashSet<RecordId>,
    ) -> SyncResult<Result<(), RecordFailure>> {
        let report = self.stores.reports.get(record.fields.report_id)?;
        let parent_key = report
            .as_ref()
            .map_or_else(|| record.fields.report_id.to_string(), report_key);

        let written = self.put(
            &self.config.collections.history,
            &history_key(record),
            &history_document(record, &parent_key, Utc::now()),
        );
        if written.is_err() {
            return Ok(written);
        }

        let Some(report) = report else {
            return Ok(Ok(()));
        };
        if republished.contains(&report.id) {
            return Ok(Ok(()));
        }
        if let Err(failure) = self.publish_report(&report)? {
            return Ok(Err(failure));
        }
        self.stores
            .reports
            .mark_synchronized_at(report.id, report.revision, Utc::now())?;
        republished.insert(report.id);
        Ok(Ok(()))
    }

    fn report_context(&self, record: &Record<Report>) -> SyncResult<ReportContext> {
        let report = &record.fields;
        let reporter = match report.user_id {
            Some(user_id) => self
                .stores
                .users
                .get(user_id)?
                .map(|u| UserSnapshot::of(&u))
                .or_else(|| report.reporter.clone()),
            None => report.reporter.clone(),
        };
        let company = match report.company_id {
            Some(company_id) => self
                .stores
                .companies
                .get(company_id)?
                .map(|c| CompanySnapshot {
                    id: Some(c.id),
                    name: c.fields.name,
                }),
            None => None,
        };
        Ok(ReportContext {
            reporter,
            company,
            status: self.current_status_of(record.id)?,
        })
    }

    fn current_status_of(&self, report_id: RecordId) -> SyncResult<StatusSnapshot> {
        let entries = self
            .stores
            .history
            .find_where(&|h| h.fields.report_id == report_id)?;
        Ok(current_status(&entries)
            .map(|entry| StatusSnapshot::of(&entry.fields))
            .unwrap_or_else(initial_status))
    }

    /// Patches the status fields of a report document after its history
    /// changed. Failures are logged; the next republish catches up.
    fn refresh_report_status(&self, report_id: RecordId) -> SyncResult<()> {
        let Some(report) = self.stores.reports.get(report_id)? else {
            return Ok(());
        };
        let status = self.current_status_of(report_id)?;
        let key = report_key(&report);
        let patch = status_patch(&status);
        if let Err(failure) = self.patch(&self.config.collections.reports, &key, &patch) {
            tracing::error!(%key, error = %failure, "could not refresh report status in mirror");
        } else {
            tracing::debug!(%key, status = %status.code, "report status refreshed");
        }
        Ok(())
    }

    // --- remote -> local ---

    fn pending_documents(
        &self,
        kind: EntityKind,
        collection: &str,
    ) -> Result<Vec<KeyedDocument>, SkipReason> {
        if !self.mirror.is_available() {
            tracing::warn!(%kind, "remote mirror unavailable, skipping pull");
            return Err(SkipReason::RemoteUnavailable);
        }
        let mut pending = BTreeMap::new();
        for (field, value) in pending_queries() {
            let docs = self
                .with_retry(|| self.mirror.query_by_field(collection, field, &value))
                .map_err(|error| {
                    tracing::error!(%kind, %collection, field, %error, "pending query failed");
                    SkipReason::QueryFailed
                })?;
            for (key, doc) in docs {
                if is_pending(&doc) {
                    pending.entry(key).or_insert(doc);
                }
            }
        }
        Ok(pending.into_iter().collect())
    }

    fn pull_report(
        &self,
        collection: &str,
        key: &str,
        doc: &Document,
    ) -> SyncResult<RecordOutcome> {
        let reports = &*self.stores.reports;

        if let Some(id) = local_id(doc) {
            return self.apply_remote_edit(reports, collection, key, id, doc, |doc, local| {
                parse_report(doc).map(|remote| remote.apply_to(local))
            });
        }

        // A previous pull may have inserted it without confirming.
        let existing = reports.find_where(&|r| r.fields.remote_key.as_deref() == Some(key))?;
        if let Some(record) = existing.first() {
            return self.acknowledge(reports, collection, key, record, false);
        }

        let remote = match parse_report(doc) {
            Ok(remote) => remote,
            Err(message) => return Ok(invalid(EntityKind::Report, key, message)),
        };
        let status = remote.status;
        let (user_id, reporter, resolved) = self.resolve_reporter(remote.reporter.as_ref())?;
        if !resolved {
            tracing::warn!(%key, "reporter not found locally, keeping embedded identity");
        }
        let company_id = self.resolve_company(remote.company.as_ref())?;

        let now = Utc::now();
        let report = remote.into_report(key, user_id, reporter, company_id, now);
        let reported_at = report.reported_at;
        let record = match reports.create(report) {
            Ok(record) => record,
            Err(err) => return Ok(RecordOutcome::Failed(per_record(err, key)?)),
        };

        let initial = StatusHistoryEntry {
            report_id: record.id,
            status,
            changed_at: reported_at,
            changed_by: user_id,
            remote_key: None,
        };
        if let Err(err) = self.stores.history.create(initial) {
            let failure = per_record(err, key)?;
            tracing::warn!(%key, error = %failure, "could not record initial status");
        }

        let outcome = self.acknowledge(reports, collection, key, &record, true)?;
        Ok(match outcome {
            RecordOutcome::Synced if !resolved => RecordOutcome::SyncedBestEffort,
            other => other,
        })
    }

    fn pull_history_entry(
        &self,
        collection: &str,
        key: &str,
        doc: &Document,
        touched: &mut BTreeSet<RecordId>,
    ) -> SyncResult<RecordOutcome> {
        let history = &*self.stores.history;

        if let Some(id) = local_id(doc) {
            let outcome = self.apply_remote_edit(history, collection, key, id, doc, |doc, local| {
                parse_history(doc).map(|remote| StatusHistoryEntry {
                    status: remote.status,
                    changed_at: remote.changed_at.unwrap_or(local.changed_at),
                    changed_by: remote.changed_by.or(local.changed_by),
                    ..local.clone()
                })
            })?;
            if outcome == RecordOutcome::Synced {
                if let Some(entry) = history.get(id)? {
                    touched.insert(entry.fields.report_id);
                }
            }
            return Ok(outcome);
        }

        let remote = match parse_history(doc) {
            Ok(remote) => remote,
            Err(message) => return Ok(invalid(EntityKind::StatusHistory, key, message)),
        };
        let Some(report) = self.resolve_report(&remote.report)? else {
            tracing::warn!(
                %key,
                report = ?remote.report,
                "status entry for unknown report, will retry"
            );
            return Ok(RecordOutcome::Failed(RecordFailure::UnresolvedReference {
                kind: EntityKind::StatusHistory,
                key: key.to_string(),
                reference: "report".into(),
            }));
        };

        let changed_at = remote.changed_at.unwrap_or_else(Utc::now);
        let existing = history.find_where(&|h| {
            h.fields.remote_key.as_deref() == Some(key)
                || (h.fields.report_id == report.id
                    && h.fields.status == remote.status
                    && h.fields.changed_at == changed_at)
        })?;
        if let Some(record) = existing.first() {
            touched.insert(report.id);
            if record.fields.remote_key.is_some() {
                return self.acknowledge(history, collection, key, record, false);
            }
            return self.adopt_history_key(collection, key, record);
        }

        let entry = StatusHistoryEntry {
            report_id: report.id,
            status: remote.status,
            changed_at,
            changed_by: remote.changed_by,
            remote_key: Some(key.to_string()),
        };
        let record = match history.create(entry) {
            Ok(record) => record,
            Err(err) => return Ok(RecordOutcome::Failed(per_record(err, key)?)),
        };
        touched.insert(report.id);
        self.acknowledge(history, collection, key, &record, true)
    }

    /// Binds a locally created entry to the mobile document describing the
    /// same transition, so it keeps a single mirror document.
    fn adopt_history_key(
        &self,
        collection: &str,
        key: &str,
        record: &Record<StatusHistoryEntry>,
    ) -> SyncResult<RecordOutcome> {
        let history = &*self.stores.history;
        let fields = StatusHistoryEntry {
            remote_key: Some(key.to_string()),
            ..record.fields.clone()
        };
        let updated = match history.update(record.id, fields) {
            Ok(updated) => updated,
            Err(err) => return Ok(RecordOutcome::Failed(per_record(err, key)?)),
        };

        // Already published under its own id.
        if record.synchronized {
            let stale = record.id.to_string();
            if let Err(failure) = self.delete_remote(collection, &stale) {
                tracing::warn!(
                    %stale,
                    error = %failure,
                    "could not drop superseded history document"
                );
            }
        }
        self.acknowledge(history, collection, key, &updated, true)
    }

    /// Applies a document that already carries a local id.
    fn apply_remote_edit<E, F>(
        &self,
        store: &dyn RecordStore<E>,
        collection: &str,
        key: &str,
        id: RecordId,
        doc: &Document,
        merge: F,
    ) -> SyncResult<RecordOutcome>
    where
        E: Entity,
        F: FnOnce(&Document, &E) -> Result<E, String>,
    {
        let Some(local) = store.get(id)? else {
            // Leftover of a mirrored delete that never reached the mirror.
            return Ok(match self.delete_remote(collection, key) {
                Ok(()) => RecordOutcome::Vanished,
                Err(failure) => RecordOutcome::Failed(failure),
            });
        };

        if self.config.conflict_policy.keeps_local(local.is_dirty()) {
            tracing::info!(kind = %E::KIND, %id, %key, "remote edit discarded, local changes win");
            return Ok(RecordOutcome::KeptLocal);
        }

        let fields = match merge(doc, &local.fields) {
            Ok(fields) => fields,
            Err(message) => return Ok(invalid(E::KIND, key, message)),
        };
        let updated = match store.update(id, fields) {
            Ok(updated) => updated,
            Err(err) => return Ok(RecordOutcome::Failed(per_record(err, key)?)),
        };
        self.acknowledge(store, collection, key, &updated, true)
    }

    /// Writes the local id back into the document; optionally marks the
    /// local record clean once the mirror confirms.
    fn acknowledge<E: Entity>(
        &self,
        store: &dyn RecordStore<E>,
        collection: &str,
        key: &str,
        record: &Record<E>,
        mark_local: bool,
    ) -> SyncResult<RecordOutcome> {
        if let Err(failure) = self.patch(collection, key, &sync_ack(record.id, Utc::now())) {
            return Ok(RecordOutcome::Failed(failure));
        }
        if mark_local {
            self.confirm(store, record)
        } else {
            Ok(RecordOutcome::Synced)
        }
    }

    /// Returns `(user_id, reporter, resolved)`.
    fn resolve_reporter(
        &self,
        snapshot: Option<&UserSnapshot>,
    ) -> SyncResult<(Option<RecordId>, Option<UserSnapshot>, bool)> {
        let Some(snapshot) = snapshot else {
            return Ok((None, None, false));
        };
        if let Some(id) = snapshot.id {
            if let Some(user) = self.stores.users.get(id)? {
                return Ok((Some(user.id), Some(UserSnapshot::of(&user)), true));
            }
        }
        if let Some(email) = &snapshot.email {
            let found = self
                .stores
                .users
                .find_where(&|u| u.fields.email.eq_ignore_ascii_case(email))?;
            if let Some(user) = found.first() {
                return Ok((Some(user.id), Some(UserSnapshot::of(user)), true));
            }
        }
        Ok((None, Some(snapshot.clone()), false))
    }

    fn resolve_company(&self, company: Option<&CompanyRef>) -> SyncResult<Option<RecordId>> {
        let Some(company) = company else {
            return Ok(None);
        };
        if let Some(id) = company.id {
            if self.stores.companies.get(id)?.is_some() {
                return Ok(Some(id));
            }
        }
        if let Some(name) = &company.name {
            let found = self
                .stores
                .companies
                .find_where(&|c| c.fields.name.eq_ignore_ascii_case(name))?;
            return Ok(found.first().map(|c| c.id));
        }
        Ok(None)
    }

    fn resolve_report(&self, reference: &ReportRef) -> SyncResult<Option<Record<Report>>> {
        match reference {
            ReportRef::Id(id) => Ok(self.stores.reports.get(*id)?),
            ReportRef::Key(key) => {
                let found = self
                    .stores
                    .reports
                    .find_where(&|r| r.fields.remote_key.as_deref() == Some(key.as_str()))?;
                if let Some(report) = found.into_iter().next() {
                    return Ok(Some(report));
                }
                match key.parse::<u64>() {
                    Ok(id) => Ok(self.stores.reports.get(RecordId(id))?),
                    Err(_) => Ok(None),
                }
            }
        }
    }

    // --- mirror calls ---

    fn delete_pair<E: Entity>(
        &self,
        store: &dyn RecordStore<E>,
        collection: &str,
        id: RecordId,
        key: Option<String>,
        outcome: &mut DeleteOutcome,
    ) -> SyncResult<()> {
        let key = key.unwrap_or_else(|| id.to_string());
        if let Err(failure) = self.delete_remote(collection, &key) {
            tracing::error!(
                kind = %E::KIND,
                %id,
                error = %failure,
                "mirror delete failed, deleting locally anyway"
            );
            outcome.mirror_failures.push(failure);
        }
        if store.get(id)?.is_some() {
            outcome.deleted += 1;
        }
        store.delete(id)?;
        Ok(())
    }

    fn put(&self, collection: &str, key: &str, doc: &Document) -> Result<(), RecordFailure> {
        self.with_retry(|| self.mirror.put(collection, key, doc))
            .map_err(|e| RecordFailure::remote_write(collection, key, e))
    }

    fn patch(&self, collection: &str, key: &str, doc: &Document) -> Result<(), RecordFailure> {
        self.with_retry(|| self.mirror.patch(collection, key, doc))
            .map_err(|e| RecordFailure::remote_write(collection, key, e))
    }

    fn delete_remote(&self, collection: &str, key: &str) -> Result<(), RecordFailure> {
        self.with_retry(|| self.mirror.delete(collection, key))
            .map_err(|e| RecordFailure::remote_write(collection, key, e))
    }

    /// Retries transient failures with backoff.
    fn with_retry<T>(&self, mut op: impl FnMut() -> RemoteResult<T>) -> RemoteResult<T> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match op() {
                Err(error) if error.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::debug!(attempt, ?delay, %error, "retrying mirror call");
                    std::thread::sleep(delay);
                }
                result => return result,
            }
        }
    }
}

impl<M: RemoteMirror> std::fmt::Debug for SyncEngine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn invalid(kind: EntityKind, key: &str, message: String) -> RecordOutcome {
    tracing::warn!(%kind, %key, %message, "skipping invalid remote document");
    RecordOutcome::Failed(RecordFailure::Validation {
        kind,
        key: key.to_string(),
        message,
    })
}

fn log_pulled(kind: EntityKind, key: &str, outcome: &RecordOutcome) {
    match outcome {
        RecordOutcome::Failed(failure @ RecordFailure::RemoteWrite { .. }) => {
            tracing::error!(%kind, %key, error = %failure, "pulled document not acknowledged");
        }
        RecordOutcome::Failed(failure) => {
            tracing::debug!(%kind, %key, error = %failure, "document left pending");
        }
        other => tracing::debug!(%kind, %key, outcome = ?other, "document pulled"),
    }
}

fn log_pass(kind: EntityKind, direction: &str, counts: &PassCounts) {
    tracing::info!(
        %kind,
        direction,
        total = counts.total,
        synced = counts.synced,
        failed = counts.failed,
        conflicts = counts.conflicts,
        "pass complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConflictPolicy, RetryConfig};
    use chrono::TimeZone;
    use lalantsika_mirror::MemoryMirror;
    use lalantsika_model::{Location, ReportStatus};
    use serde_json::{json, Value};

    fn config() -> SyncConfig {
        SyncConfig::new().with_retry(RetryConfig::no_retry())
    }

    fn engine() -> SyncEngine<Arc<MemoryMirror>> {
        SyncEngine::new(config(), Stores::in_memory(), Arc::new(MemoryMirror::new()))
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn report(description: &str) -> Report {
        Report {
            description: description.into(),
            budget: 1000,
            surface_m2: 3.0,
            location: Location {
                latitude: -18.9,
                longitude: 47.5,
            },
            user_id: None,
            reporter: None,
            company_id: None,
            remote_key: None,
            reported_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    fn entry(report_id: RecordId, status: ReportStatus, hour: u32) -> StatusHistoryEntry {
        StatusHistoryEntry {
            report_id,
            status,
            changed_at: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
            changed_by: None,
            remote_key: None,
        }
    }

    #[test]
    fn history_push_republishes_report_status() {
        let engine = engine();
        let stores = engine.stores();
        let report = stores.reports.create(report("pothole")).unwrap();
        stores
            .history
            .create(entry(report.id, ReportStatus::New, 8))
            .unwrap();
        stores
            .history
            .create(entry(report.id, ReportStatus::InProgress, 10))
            .unwrap();

        let result = engine.push_status_history().unwrap();
        assert_eq!(result.counts().unwrap().synced, 2);

        let mirrored = engine.mirror().document("signalements", "1").unwrap();
        assert_eq!(mirrored["status"]["code"], json!("en_cours"));
        assert_eq!(mirrored["progress"], json!(50));
        assert!(stores.reports.get(report.id).unwrap().unwrap().synchronized);

        let history_doc = engine.mirror().document("histo_statuts", "2").unwrap();
        assert_eq!(history_doc["report_key"], json!("1"));
        assert_eq!(history_doc["status"], json!("en_cours"));
    }

    #[test]
    fn failed_republish_leaves_entry_dirty() {
        let engine = engine();
        let stores = engine.stores();
        let report = stores.reports.create(report("pothole")).unwrap();
        let entry = stores
            .history
            .create(entry(report.id, ReportStatus::Completed, 9))
            .unwrap();
        engine.mirror().fail_writes_for("signalements", "1");

        let result = engine.push_status_history().unwrap();
        assert_eq!(result.counts().unwrap().failed, 1);
        assert!(!stores.history.get(entry.id).unwrap().unwrap().synchronized);
    }

    #[test]
    fn pulled_report_resolves_reporter_by_email() {
        let engine = engine();
        let stores = engine.stores();
        let user = stores.users.create(User::new("a@b.com", "Rakoto")).unwrap();
        let key = engine.mirror().push(
            "signalements",
            doc(json!({
                "description": "Lavaka",
                "latitude": -18.9,
                "longitude": 47.5,
                "user": {"email": "A@B.com"},
                "synchronized": false
            })),
        );

        let result = engine.pull_reports().unwrap();
        let counts = result.counts().unwrap();
        assert_eq!((counts.total, counts.synced, counts.unresolved), (1, 1, 0));

        let pulled = stores.reports.all().unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].fields.user_id, Some(user.id));
        assert_eq!(pulled[0].fields.remote_key.as_deref(), Some(key.as_str()));
        assert!(pulled[0].synchronized);

        // Initial status comes from the document (default nouveau).
        let history = stores.history.all().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].fields.status, ReportStatus::New);
    }

    #[test]
    fn unresolved_reporter_is_best_effort() {
        let engine = engine();
        engine.mirror().push(
            "signalements",
            doc(json!({
                "description": "Lavaka",
                "latitude": 0, "longitude": 0,
                "user": {"id": 99, "email": "ghost@b.com", "name": "Ghost"}
            })),
        );

        let counts = *engine.pull_reports().unwrap().counts().unwrap();
        assert_eq!((counts.synced, counts.unresolved), (1, 1));

        let pulled = &engine.stores().reports.all().unwrap()[0];
        assert_eq!(pulled.fields.user_id, None);
        assert_eq!(
            pulled.fields.reporter.as_ref().unwrap().email.as_deref(),
            Some("ghost@b.com")
        );
    }

    #[test]
    fn invalid_remote_document_is_skipped() {
        let engine = engine();
        engine
            .mirror()
            .push("signalements", doc(json!({"description": "no coordinates"})));
        engine.mirror().push(
            "signalements",
            doc(json!({"description": "ok", "latitude": 1, "longitude": 1})),
        );

        let counts = *engine.pull_reports().unwrap().counts().unwrap();
        assert_eq!((counts.total, counts.synced, counts.failed), (2, 1, 1));
        assert_eq!(engine.stores().reports.all().unwrap().len(), 1);
    }

    #[test]
    fn unacknowledged_pull_is_not_duplicated() {
        let engine = engine();
        let key = engine.mirror().push(
            "signalements",
            doc(json!({"description": "x", "latitude": 1, "longitude": 1})),
        );
        engine.mirror().fail_writes_for("signalements", &key);

        let counts = *engine.pull_reports().unwrap().counts().unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(engine.stores().reports.all().unwrap().len(), 1);

        engine.mirror().clear_failures();
        let counts = *engine.pull_reports().unwrap().counts().unwrap();
        assert_eq!(counts.synced, 1);
        assert_eq!(engine.stores().reports.all().unwrap().len(), 1);
        assert_eq!(
            engine.mirror().document("signalements", &key).unwrap()["synchronized"],
            json!(true)
        );
    }

    #[test]
    fn pulled_history_updates_report_status() {
        let engine = engine();
        let stores = engine.stores();
        let key = engine.mirror().push(
            "signalements",
            doc(json!({"description": "x", "latitude": 1, "longitude": 1})),
        );
        engine.pull_reports().unwrap();

        engine.mirror().push(
            "histo_statuts",
            doc(json!({
                "report_key": key,
                "status": "termine",
                "changed_at": "2099-01-01T00:00:00Z"
            })),
        );
        let counts = *engine.pull_status_history().unwrap().counts().unwrap();
        assert_eq!(counts.synced, 1);

        let report_doc = engine.mirror().document("signalements", &key).unwrap();
        assert_eq!(report_doc["status"]["code"], json!("termine"));
        assert_eq!(report_doc["progress"], json!(100));
        assert_eq!(stores.history.all().unwrap().len(), 2);
    }

    #[test]
    fn adopted_history_key_replaces_published_document() {
        let engine = engine();
        let stores = engine.stores();
        let report = stores.reports.create(report("x")).unwrap();
        let entry = stores
            .history
            .create(entry(report.id, ReportStatus::New, 8))
            .unwrap();
        engine.push_status_history().unwrap();
        assert!(engine.mirror().document("histo_statuts", "1").is_some());

        let key = engine.mirror().push(
            "histo_statuts",
            doc(json!({
                "report_id": 1,
                "status": "nouveau",
                "changed_at": "2025-03-01T08:00:00Z"
            })),
        );
        let counts = *engine.pull_status_history().unwrap().counts().unwrap();
        assert_eq!(counts.synced, 1);

        let adopted = stores.history.get(entry.id).unwrap().unwrap();
        assert_eq!(adopted.fields.remote_key.as_deref(), Some(key.as_str()));
        assert!(adopted.synchronized);
        assert!(engine.mirror().document("histo_statuts", "1").is_none());
        assert_eq!(engine.mirror().len("histo_statuts"), 1);
    }

    #[test]
    fn history_for_unknown_report_waits() {
        let engine = engine();
        engine.mirror().push(
            "histo_statuts",
            doc(json!({"report_key": "-Mmissing", "status": "en_cours"})),
        );
        let counts = *engine.pull_status_history().unwrap().counts().unwrap();
        assert_eq!(counts.failed, 1);
        assert!(engine.stores().history.all().unwrap().is_empty());
    }

    #[test]
    fn remote_edit_loses_to_dirty_local_record() {
        let engine = engine();
        let stores = engine.stores();
        let local = stores.reports.create(report("local text")).unwrap();
        engine.mirror().insert_raw(
            "signalements",
            "1",
            doc(json!({
                "id": 1, "synchronized": false,
                "description": "remote text", "latitude": 1, "longitude": 1
            })),
        );

        let counts = *engine.pull_reports().unwrap().counts().unwrap();
        assert_eq!(counts.conflicts, 1);
        let kept = stores.reports.get(local.id).unwrap().unwrap();
        assert_eq!(kept.fields.description, "local text");
        assert!(!kept.synchronized);
    }

    #[test]
    fn remote_edit_applies_to_clean_record() {
        let engine = engine();
        let stores = engine.stores();
        let local = stores.reports.create(report("local text")).unwrap();
        stores.reports.mark_synchronized(local.id, Utc::now()).unwrap();
        engine.mirror().insert_raw(
            "signalements",
            "1",
            doc(json!({
                "id": 1, "synchronized": false,
                "description": "remote text", "budget": 42, "latitude": 1, "longitude": 1
            })),
        );

        let counts = *engine.pull_reports().unwrap().counts().unwrap();
        assert_eq!(counts.synced, 1);
        let updated = stores.reports.get(local.id).unwrap().unwrap();
        assert_eq!(updated.fields.description, "remote text");
        assert_eq!(updated.fields.budget, 42);
        assert!(updated.synchronized);
    }

    #[test]
    fn remote_wins_policy_overrides_dirty_record() {
        let engine = SyncEngine::new(
            config().with_conflict_policy(ConflictPolicy::RemoteWins),
            Stores::in_memory(),
            Arc::new(MemoryMirror::new()),
        );
        let local = engine.stores().reports.create(report("local")).unwrap();
        engine.mirror().insert_raw(
            "signalements",
            "1",
            doc(json!({
                "id": 1, "synchronized": false,
                "description": "remote", "latitude": 1, "longitude": 1
            })),
        );

        engine.pull_reports().unwrap();
        let updated = engine.stores().reports.get(local.id).unwrap().unwrap();
        assert_eq!(updated.fields.description, "remote");
    }

    #[test]
    fn push_one_writes_through() {
        let engine = engine();
        let param = engine
            .stores()
            .parameters
            .create(Parameter::new("max_login_attempts", "3"))
            .unwrap();

        let outcome = engine.push_one(EntityKind::Parameter, param.id).unwrap();
        assert_eq!(outcome, RecordOutcome::Synced);
        assert_eq!(
            engine.mirror().document("parametres", "1").unwrap()["value"],
            json!("3")
        );

        engine.mirror().set_available(false);
        let outcome = engine.push_one(EntityKind::Parameter, param.id).unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Failed(RecordFailure::RemoteUnavailable)
        );
        assert_eq!(
            engine.push_one(EntityKind::User, RecordId(404)).unwrap(),
            RecordOutcome::Failed(RecordFailure::RemoteUnavailable)
        );
    }

    #[test]
    fn delete_cascades_to_history() {
        let engine = engine();
        let stores = engine.stores();
        let report = stores.reports.create(report("x")).unwrap();
        stores
            .history
            .create(entry(report.id, ReportStatus::New, 8))
            .unwrap();
        engine.push_reports().unwrap();
        engine.push_status_history().unwrap();
        assert_eq!(engine.mirror().len("histo_statuts"), 1);

        let outcome = engine.delete_mirrored(EntityKind::Report, report.id).unwrap();
        assert_eq!(outcome.deleted, 2);
        assert!(outcome.mirror_failures.is_empty());
        assert!(engine.mirror().is_empty("signalements"));
        assert!(engine.mirror().is_empty("histo_statuts"));
        assert!(stores.history.all().unwrap().is_empty());
    }

    #[test]
    fn local_delete_proceeds_when_mirror_fails() {
        let engine = engine();
        let user = engine
            .stores()
            .users
            .create(User::new("a@b.com", "Rakoto"))
            .unwrap();
        engine.mirror().set_fail_all_writes(true);

        let outcome = engine.delete_mirrored(EntityKind::User, user.id).unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.mirror_failures.len(), 1);
        assert!(engine.stores().users.get(user.id).unwrap().is_none());

        // Idempotent.
        let again = engine.delete_mirrored(EntityKind::User, user.id).unwrap();
        assert_eq!(again.deleted, 0);
    }

    #[test]
    fn orphaned_remote_edit_is_cleaned_up() {
        let engine = engine();
        engine.mirror().insert_raw(
            "signalements",
            "5",
            doc(json!({"id": 5, "synchronized": false, "description": "gone"})),
        );
        let counts = *engine.pull_reports().unwrap().counts().unwrap();
        assert_eq!(counts.vanished, 1);
        assert!(engine.mirror().document("signalements", "5").is_none());
    }

    #[test]
    fn retries_are_bounded() {
        let mirror = Arc::new(MemoryMirror::new());
        let engine = SyncEngine::new(
            SyncConfig::new().with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(std::time::Duration::from_millis(1))
                    .with_max_delay(std::time::Duration::from_millis(2)),
            ),
            Stores::in_memory(),
            Arc::clone(&mirror),
        );
        engine
            .stores()
            .users
            .create(User::new("a@b.com", "Rakoto"))
            .unwrap();
        mirror.set_fail_all_writes(true);

        let counts = *engine.push_users().unwrap().counts().unwrap();
        assert_eq!((counts.synced, counts.failed), (0, 1));
        assert_eq!(mirror.write_count(), 0);
    }

    #[test]
    fn pending_counts_cover_every_kind() {
        let engine = engine();
        engine
            .stores()
            .parameters
            .create(Parameter::new("k", "v"))
            .unwrap();
        let pending = engine.stores().pending_counts().unwrap();
        assert_eq!(pending.len(), 5);
        assert_eq!(pending[&EntityKind::Parameter], 1);
        assert_eq!(pending[&EntityKind::User], 0);
    }
}
