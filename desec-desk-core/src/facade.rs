//! Core façade.
//!
//! [`DeskCore`] is the single entry point for the shell: it owns the active
//! profile's subsystems (transport, queue, cache, version store) and a
//! router task that sits between the queue's event stream and the UI event
//! channel. The router applies completions to the cache, triggers version
//! snapshots, aggregates bulk groups, and forwards everything as
//! [`CoreEvent`]s. Cache writes observed by the UI are therefore totally
//! ordered by queue completion.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use desec_desk_client::catalog::{self, RecordType, RecordValidationError};
use desec_desk_client::types::{AccountInfo, Rrset, RrsetPatch, Zone};
use desec_desk_client::{ApiRequest, DesecClient, HttpMethod, Transport};

use crate::cache::ZoneCache;
use crate::config::Settings;
use crate::credentials;
use crate::error::{CoreError, CoreResult};
use crate::events::{BulkFailure, BulkSummary, CoreEvent, NotifyLevel};
use crate::profiles::ProfileManager;
use crate::queue::{ApiQueue, ItemStatus, Priority, QueueConfig, QueueEvent, QueueItem, QueueSnapshot};
use crate::versions::{SnapshotEntry, SnapshotRef, VersionStore};

/// Builds a transport from the profile's settings and unsealed token.
pub type TransportFactory =
    Box<dyn Fn(&Settings, Option<String>) -> Arc<dyn Transport> + Send + Sync>;

/// Cancel handle returned by every submission.
pub struct QueueHandle {
    pub id: u64,
    queue: Arc<ApiQueue>,
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle").field("id", &self.id).finish()
    }
}

impl QueueHandle {
    /// Cancels the item. Pending cancellation is guaranteed; running
    /// cancellation is best-effort.
    pub fn cancel(&self) -> bool {
        self.queue.cancel(self.id)
    }
}

#[derive(Default)]
struct BulkGroup {
    expected: usize,
    done: usize,
    success: usize,
    failures: Vec<BulkFailure>,
}

/// State shared between the façade and the router task.
struct Shared {
    online: AtomicBool,
    account: Mutex<Option<(AccountInfo, DateTime<Utc>)>>,
    /// Refresh keys currently queued or running, to collapse duplicate
    /// refreshes (`zones`, `records:<domain>`, `account`).
    inflight: Mutex<HashSet<String>>,
    bulk: Mutex<(u64, HashMap<u64, BulkGroup>)>,
}

impl Shared {
    fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            account: Mutex::new(None),
            inflight: Mutex::new(HashSet::new()),
            bulk: Mutex::new((0, HashMap::new())),
        }
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Everything owned by the active profile.
struct Session {
    profile: String,
    settings: Settings,
    transport: Arc<dyn Transport>,
    queue: Arc<ApiQueue>,
    cache: Arc<ZoneCache>,
    versions: Arc<VersionStore>,
    shared: Arc<Shared>,
    router: JoinHandle<()>,
    keepalive: Option<JoinHandle<()>>,
}

impl Session {
    /// Enqueues a cache refresh unless one with the same key is already in
    /// flight.
    fn submit_refresh(
        &self,
        key: &str,
        priority: Priority,
        category: &str,
        action: &str,
        request: ApiRequest,
    ) {
        submit_refresh(&self.queue, &self.shared, key, priority, category, action, request);
    }

    async fn teardown(self) {
        if let Some(keepalive) = self.keepalive {
            keepalive.abort();
        }
        self.queue.shutdown().await;
        self.router.abort();
    }
}

fn submit_refresh(
    queue: &Arc<ApiQueue>,
    shared: &Arc<Shared>,
    key: &str,
    priority: Priority,
    category: &str,
    action: &str,
    request: ApiRequest,
) {
    {
        let mut inflight = shared.lock_inflight();
        if !inflight.insert(key.to_string()) {
            return;
        }
    }
    if let Err(e) = queue.submit(priority, category, action, request) {
        log::warn!("Failed to enqueue refresh '{key}': {e}");
        shared.lock_inflight().remove(key);
    }
}

/// Builder for [`DeskCore`].
///
/// The transport factory is the injection seam: production code uses the
/// default reqwest-backed [`DesecClient`], tests inject a scripted double.
#[derive(Default)]
pub struct DeskCoreBuilder {
    root: Option<PathBuf>,
    transport_factory: Option<TransportFactory>,
}

impl DeskCoreBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the application root directory (defaults to the platform
    /// config dir).
    #[must_use]
    pub fn root(mut self, root: PathBuf) -> Self {
        self.root = Some(root);
        self
    }

    /// Overrides how transports are constructed.
    #[must_use]
    pub fn transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Builds the core and starts the active profile's subsystems.
    pub fn build(self) -> CoreResult<DeskCore> {
        let root = match self.root {
            Some(root) => root,
            None => dirs::config_dir()
                .ok_or_else(|| CoreError::StorageError("no user config directory".to_string()))?
                .join("desec-desk"),
        };
        let factory = self.transport_factory.unwrap_or_else(|| {
            Box::new(|settings: &Settings, token: Option<String>| {
                Arc::new(DesecClient::with_timeout(
                    &settings.api_url,
                    settings.api_rate_limit,
                    token,
                    settings.http_timeout_secs,
                )) as Arc<dyn Transport>
            })
        });

        let profiles = ProfileManager::open(root.clone())?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = build_session(&profiles, profiles.active(), &factory, &events_tx)?;

        Ok(DeskCore {
            root,
            profiles: Mutex::new(profiles),
            transport_factory: factory,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            session: tokio::sync::RwLock::new(session),
        })
    }
}

/// Single entry point used by the UI layer.
pub struct DeskCore {
    root: PathBuf,
    profiles: Mutex<ProfileManager>,
    transport_factory: TransportFactory,
    events_tx: mpsc::UnboundedSender<CoreEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<CoreEvent>>>,
    session: tokio::sync::RwLock<Session>,
}

fn build_session(
    profiles: &ProfileManager,
    profile: &str,
    factory: &TransportFactory,
    events_tx: &mpsc::UnboundedSender<CoreEvent>,
) -> CoreResult<Session> {
    let settings = Settings::load(&profiles.config_path(profile));

    // Unseal the token; a failure means re-authentication, not a dead core.
    let token = match &settings.sealed_token {
        Some(sealed) => {
            let salt = credentials::ensure_salt(&profiles.salt_path(profile))?;
            match credentials::unseal(sealed, &credentials::machine_passphrase(), &salt) {
                Ok(token) => Some(token),
                Err(e) => {
                    log::warn!("Failed to unseal API token: {e}");
                    None
                }
            }
        }
        None => None,
    };

    let transport = factory(&settings, token);
    let cache = Arc::new(ZoneCache::new(profiles.cache_dir(profile))?);
    let versions = Arc::new(VersionStore::new(profiles.versions_dir(profile))?);
    let shared = Arc::new(Shared::new());

    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let queue = Arc::new(ApiQueue::spawn(
        Arc::clone(&transport),
        queue_tx,
        QueueConfig {
            history_limit: settings.queue_history_limit,
            persist: settings.queue_history_persist,
            history_path: Some(profiles.root().join("queue_history.json")),
        },
    ));

    if settings.offline_mode {
        queue.pause();
        shared.online.store(false, Ordering::SeqCst);
    }

    let router = tokio::spawn(route_events(
        queue_rx,
        RouterCtx {
            queue: Arc::downgrade(&queue),
            cache: Arc::clone(&cache),
            versions: Arc::clone(&versions),
            transport: Arc::clone(&transport),
            shared: Arc::clone(&shared),
            events: events_tx.clone(),
        },
    ));

    let keepalive = if settings.keepalive_interval_secs > 0 && !settings.offline_mode {
        Some(tokio::spawn(keepalive_loop(
            Arc::downgrade(&queue),
            Arc::clone(&shared),
            settings.keepalive_interval_secs,
        )))
    } else {
        None
    };

    log::info!("Session ready for profile '{profile}'");
    Ok(Session {
        profile: profile.to_string(),
        settings,
        transport,
        queue,
        cache,
        versions,
        shared,
        router,
        keepalive,
    })
}

/// Periodic connectivity probe; exits when the queue is gone.
async fn keepalive_loop(queue: Weak<ApiQueue>, shared: Arc<Shared>, interval_secs: u64) {
    loop {
        tokio::time::sleep(Duration::from_secs(interval_secs)).await;
        let Some(queue) = queue.upgrade() else {
            break;
        };
        if !queue.is_paused() {
            submit_refresh(
                &queue,
                &shared,
                "zones",
                Priority::Low,
                "connectivity",
                "Connectivity check",
                ApiRequest::connectivity_check(),
            );
        }
    }
}

struct RouterCtx {
    /// Weak so the router never keeps the queue (and its event sender)
    /// alive after a profile switch.
    queue: Weak<ApiQueue>,
    cache: Arc<ZoneCache>,
    versions: Arc<VersionStore>,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<CoreEvent>,
}

impl RouterCtx {
    fn emit(&self, event: CoreEvent) {
        let _ = self.events.send(event);
    }

    fn notify(&self, level: NotifyLevel, title: &str, message: &str) {
        self.emit(CoreEvent::Notify {
            level,
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn set_online(&self, online: bool) {
        if self.shared.online.swap(online, Ordering::SeqCst) != online {
            self.emit(CoreEvent::OnlineChanged(online));
        }
    }
}

/// Bridges queue events to the UI channel, applying completions on the way.
async fn route_events(mut rx: mpsc::UnboundedReceiver<QueueEvent>, ctx: RouterCtx) {
    while let Some(event) = rx.recv().await {
        match event {
            QueueEvent::Started(id) => ctx.emit(CoreEvent::ItemStarted { id }),
            QueueEvent::Changed | QueueEvent::Paused | QueueEvent::Resumed => {
                ctx.emit(CoreEvent::QueueChanged);
            }
            QueueEvent::RateLimited { retry_after } => {
                ctx.emit(CoreEvent::RateLimited { retry_after });
            }
            QueueEvent::Finished(item) => {
                handle_finished(&ctx, &item).await;
                ctx.emit(CoreEvent::ItemFinished(item));
            }
        }
    }
}

// ===== Request shape helpers =====

/// Domain of a `/domains/{d}/rrsets...` path.
fn rrsets_domain(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/domains/")?;
    let (domain, tail) = rest.split_once('/')?;
    if tail.starts_with("rrsets") {
        Some(domain)
    } else {
        None
    }
}

/// Zone name of a `/domains/{name}/` path (no deeper segments).
fn zone_item_name(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/domains/")?.strip_suffix('/')?;
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest)
    }
}

/// Refresh-dedup key for cache-filling GET requests.
fn refresh_key(request: &ApiRequest) -> Option<String> {
    if request.method != HttpMethod::Get {
        return None;
    }
    if request.path == "/domains/" {
        return Some("zones".to_string());
    }
    if request.path == "/auth/account/" {
        return Some("account".to_string());
    }
    rrsets_domain(&request.path)
        .filter(|_| request.path.ends_with("/rrsets/"))
        .map(|d| format!("records:{d}"))
}

fn error_code(item: &QueueItem) -> Option<&str> {
    item.response.as_ref()?.get("code")?.as_str()
}

/// Applies a terminal item to the cache/version/account state.
async fn handle_finished(ctx: &RouterCtx, item: &QueueItem) {
    if let Some(key) = refresh_key(&item.request) {
        ctx.shared.lock_inflight().remove(&key);
    }

    track_bulk(ctx, item);

    match item.status {
        ItemStatus::Ok => {
            ctx.set_online(true);
            apply_success(ctx, item);
        }
        ItemStatus::Failed => match error_code(item) {
            Some("NetworkError" | "Timeout") => {
                ctx.set_online(false);
                ctx.notify(
                    NotifyLevel::Warning,
                    "Connection problem",
                    item.error.as_deref().unwrap_or("Network error"),
                );
            }
            Some("Unauthenticated") => {
                // Drop the rejected token from memory; the shell must
                // prompt for a new one.
                ctx.transport.set_token(None).await;
                ctx.notify(
                    NotifyLevel::Error,
                    "Authentication failed",
                    "The API token was rejected. Please re-authenticate.",
                );
            }
            _ => {}
        },
        _ => {}
    }
}

fn track_bulk(ctx: &RouterCtx, item: &QueueItem) {
    let Some(group_id) = item.group else {
        return;
    };
    let summary = {
        let mut bulk = ctx
            .shared
            .bulk
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let finished = {
            let Some(group) = bulk.1.get_mut(&group_id) else {
                return;
            };
            group.done += 1;
            if item.status == ItemStatus::Ok {
                group.success += 1;
            } else {
                group.failures.push(BulkFailure {
                    action: item.action.clone(),
                    reason: item
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("{:?}", item.status)),
                });
            }
            group.done >= group.expected
        };
        if finished {
            bulk.1.remove(&group_id).map(|g| BulkSummary {
                group: group_id,
                success_count: g.success,
                failed_count: g.failures.len(),
                failures: g.failures,
            })
        } else {
            None
        }
    };
    if let Some(summary) = summary {
        log::info!(
            "Bulk group {group_id} finished: {} ok, {} failed",
            summary.success_count,
            summary.failed_count
        );
        ctx.emit(CoreEvent::BulkCompleted(summary));
    }
}

fn apply_success(ctx: &RouterCtx, item: &QueueItem) {
    let request = &item.request;
    match request.method {
        HttpMethod::Get => {
            if request.path == "/domains/" {
                match item_response::<Vec<Zone>>(item) {
                    Ok(zones) => {
                        if let Err(e) = ctx.cache.put_zones(zones) {
                            ctx.notify(
                                NotifyLevel::Warning,
                                "Cache write failed",
                                &e.to_string(),
                            );
                        }
                    }
                    Err(e) => log::warn!("Unparseable zone list: {e}"),
                }
            } else if request.path == "/auth/account/" {
                match item_response::<AccountInfo>(item) {
                    Ok(info) => {
                        let mut account = ctx
                            .shared
                            .account
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        *account = Some((info, Utc::now()));
                    }
                    Err(e) => log::warn!("Unparseable account info: {e}"),
                }
            } else if let Some(domain) = rrsets_domain(&request.path) {
                if request.path.ends_with("/rrsets/") {
                    match item_response::<Vec<Rrset>>(item) {
                        Ok(records) => {
                            if let Err(e) = ctx.cache.put_records(domain, records.clone()) {
                                ctx.notify(
                                    NotifyLevel::Warning,
                                    "Cache write failed",
                                    &e.to_string(),
                                );
                            }
                            // Snapshots are best-effort; never fail the read.
                            match ctx.versions.snapshot(domain, &item.action, &records) {
                                Ok(Some(hash)) => {
                                    log::debug!("Snapshot {hash} appended for {domain}");
                                }
                                Ok(None) => {}
                                Err(e) => ctx.notify(
                                    NotifyLevel::Warning,
                                    "Version snapshot failed",
                                    &e.to_string(),
                                ),
                            }
                        }
                        Err(e) => log::warn!("Unparseable record list for {domain}: {e}"),
                    }
                }
            }
        }
        HttpMethod::Post | HttpMethod::Patch | HttpMethod::Put | HttpMethod::Delete => {
            if let Some(domain) = rrsets_domain(&request.path) {
                let domain = domain.to_string();
                ctx.cache.invalidate_records(&domain);
                ctx.emit(CoreEvent::CacheInvalidated {
                    key: format!("records:{domain}"),
                });
                if let Some(queue) = ctx.queue.upgrade() {
                    submit_refresh(
                        &queue,
                        &ctx.shared,
                        &format!("records:{domain}"),
                        Priority::Normal,
                        "records",
                        &format!("Sync after: {}", item.action),
                        ApiRequest::list_rrsets(&domain),
                    );
                }
            } else if request.path == "/domains/" || zone_item_name(&request.path).is_some() {
                ctx.cache.invalidate_zones();
                ctx.emit(CoreEvent::CacheInvalidated {
                    key: "zones".to_string(),
                });
                if let Some(queue) = ctx.queue.upgrade() {
                    submit_refresh(
                        &queue,
                        &ctx.shared,
                        "zones",
                        Priority::High,
                        "zones",
                        "Reload zone list",
                        ApiRequest::list_zones(),
                    );
                }
            }
        }
    }
}

fn item_response<T: serde::de::DeserializeOwned>(item: &QueueItem) -> CoreResult<T> {
    let body = item
        .response
        .clone()
        .ok_or_else(|| CoreError::SerializationError("empty response body".to_string()))?;
    Ok(serde_json::from_value(body)?)
}

// ===== Local validation =====

fn parse_record_type(rtype: &str) -> CoreResult<RecordType> {
    RecordType::from_str(rtype).map_err(|e| {
        CoreError::Validation(RecordValidationError {
            index: 0,
            reason: e.to_string(),
        })
    })
}

fn body_records(body: &serde_json::Value) -> Option<Vec<String>> {
    serde_json::from_value(body.get("records")?.clone()).ok()
}

/// Validates record-writing requests locally so malformed input never
/// reaches the network. Non-record requests pass through untouched.
fn validate_record_write(request: &ApiRequest) -> CoreResult<()> {
    if rrsets_domain(&request.path).is_none() {
        return Ok(());
    }
    match request.method {
        HttpMethod::Post => {
            let Some(body) = &request.body else {
                return Ok(());
            };
            let rtype = parse_record_type(body.get("type").and_then(|t| t.as_str()).unwrap_or(""))?;
            let ttl = body.get("ttl").and_then(serde_json::Value::as_u64).unwrap_or(0) as u32;
            let records = body_records(body).unwrap_or_default();
            catalog::validate(rtype, ttl, &records)?;
        }
        HttpMethod::Patch => {
            // Type is in the path: /domains/{d}/rrsets/{sub}/{type}/
            let segments: Vec<&str> = request.path.trim_end_matches('/').split('/').collect();
            let rtype = parse_record_type(segments.last().copied().unwrap_or(""))?;
            let Some(body) = &request.body else {
                return Ok(());
            };
            let ttl = body.get("ttl").and_then(serde_json::Value::as_u64);
            if let Some(ttl) = ttl {
                catalog::validate_ttl(ttl as u32)?;
            }
            if let Some(records) = body_records(body) {
                catalog::validate(rtype, ttl.map_or(catalog::TTL_MIN, |t| t as u32), &records)?;
            }
        }
        HttpMethod::Put => {
            let Some(serde_json::Value::Array(entries)) = &request.body else {
                return Ok(());
            };
            for entry in entries {
                let records = body_records(entry).unwrap_or_default();
                if records.is_empty() {
                    continue; // deletion tombstone
                }
                let rtype =
                    parse_record_type(entry.get("type").and_then(|t| t.as_str()).unwrap_or(""))?;
                let ttl =
                    entry.get("ttl").and_then(serde_json::Value::as_u64).unwrap_or(u64::from(catalog::TTL_MIN)) as u32;
                catalog::validate(rtype, ttl, &records)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ===== Façade =====

impl DeskCore {
    /// Convenience constructor with all defaults.
    pub fn open() -> CoreResult<Self> {
        DeskCoreBuilder::new().build()
    }

    /// Takes the UI event receiver. May be called once.
    pub fn events(&self) -> CoreResult<mpsc::UnboundedReceiver<CoreEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .ok_or_else(|| CoreError::StorageError("event receiver already taken".to_string()))
    }

    // ===== Queue operations =====

    /// Enqueues an arbitrary request after local validation.
    pub async fn submit(
        &self,
        priority: Priority,
        category: &str,
        action: &str,
        request: ApiRequest,
    ) -> CoreResult<QueueHandle> {
        validate_record_write(&request)?;
        let session = self.session.read().await;
        let id = session.queue.submit(priority, category, action, request)?;
        Ok(QueueHandle {
            id,
            queue: Arc::clone(&session.queue),
        })
    }

    /// Creates an RRset. Validation failures never reach the network.
    pub async fn create_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &str,
        ttl: u32,
        records: &[String],
    ) -> CoreResult<QueueHandle> {
        let record_type = parse_record_type(rtype)?;
        catalog::validate(record_type, ttl, records)?;
        let action = format!("Create {rtype} record {}", record_label(zone, subname));
        self.submit(
            Priority::Normal,
            "records",
            &action,
            ApiRequest::create_rrset(zone, subname, rtype, ttl, records),
        )
        .await
    }

    /// Updates an RRset via PATCH.
    pub async fn update_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &str,
        patch: RrsetPatch,
    ) -> CoreResult<QueueHandle> {
        let action = format!("Update {rtype} record {}", record_label(zone, subname));
        self.submit(
            Priority::Normal,
            "records",
            &action,
            ApiRequest::update_rrset(zone, subname, rtype, &patch),
        )
        .await
    }

    /// Deletes an RRset.
    pub async fn delete_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &str,
    ) -> CoreResult<QueueHandle> {
        let action = format!("Delete {rtype} record {}", record_label(zone, subname));
        self.submit(
            Priority::Normal,
            "records",
            &action,
            ApiRequest::delete_rrset(zone, subname, rtype),
        )
        .await
    }

    /// Deletes several RRsets as one bulk group; failures do not stop the
    /// rest, and a [`CoreEvent::BulkCompleted`] summary follows the last
    /// item. Returns the group id.
    pub async fn bulk_delete_rrsets(
        &self,
        zone: &str,
        keys: &[(String, String)],
    ) -> CoreResult<u64> {
        let session = self.session.read().await;
        let group_id = {
            let mut bulk = session
                .shared
                .bulk
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            bulk.0 += 1;
            let id = bulk.0;
            bulk.1.insert(
                id,
                BulkGroup {
                    expected: keys.len(),
                    ..BulkGroup::default()
                },
            );
            id
        };
        for (subname, rtype) in keys {
            let action = format!("Delete {rtype} record {}", record_label(zone, subname));
            session.queue.submit_in_group(
                Priority::Normal,
                "records",
                &action,
                ApiRequest::delete_rrset(zone, subname, rtype),
                Some(group_id),
            )?;
        }
        Ok(group_id)
    }

    /// Creates a zone.
    pub async fn create_zone(&self, name: &str) -> CoreResult<QueueHandle> {
        self.submit(
            Priority::Normal,
            "zones",
            &format!("Create zone {name}"),
            ApiRequest::create_zone(name),
        )
        .await
    }

    /// Deletes a zone.
    pub async fn delete_zone(&self, name: &str) -> CoreResult<QueueHandle> {
        self.submit(
            Priority::Normal,
            "zones",
            &format!("Delete zone {name}"),
            ApiRequest::delete_zone(name),
        )
        .await
    }

    /// Pauses the queue.
    pub async fn pause(&self) {
        self.session.read().await.queue.pause();
    }

    /// Resumes the queue.
    pub async fn resume(&self) {
        self.session.read().await.queue.resume();
    }

    /// Whether the queue is paused (explicitly, by offline mode, or by
    /// cooldown).
    pub async fn paused(&self) -> bool {
        self.session.read().await.queue.is_paused()
    }

    /// Structural copy of the queue for display.
    pub async fn queue_snapshot(&self) -> QueueSnapshot {
        self.session.read().await.queue.snapshot()
    }

    /// Updates the dispatch rate (persisted in the profile settings).
    pub async fn set_rate(&self, rate: f64) -> CoreResult<()> {
        let mut session = self.session.write().await;
        let rate = rate.clamp(0.0, 10.0);
        session.transport.set_rate(rate).await;
        session.settings.api_rate_limit = rate;
        let path = {
            let profiles = self
                .profiles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            profiles.config_path(&session.profile)
        };
        session.settings.save(&path)
    }

    // ===== Cache-first readers =====

    /// Cached zones; enqueues a refresh when missing or stale.
    pub async fn zones(&self) -> Option<Vec<Zone>> {
        let session = self.session.read().await;
        let cached = session.cache.zones();
        if session.cache.zones_stale(session.settings.sync_interval_minutes) {
            let priority = if cached.is_none() {
                Priority::High
            } else {
                Priority::Low
            };
            session.submit_refresh(
                "zones",
                priority,
                "zones",
                "Load zone list",
                ApiRequest::list_zones(),
            );
        }
        cached.map(|(zones, _)| zones)
    }

    /// Cached records of `domain`; enqueues a refresh when missing or stale.
    pub async fn records(&self, domain: &str) -> Option<Vec<Rrset>> {
        let session = self.session.read().await;
        let cached = session.cache.records(domain);
        if session.cache.records_stale(domain) {
            let priority = if cached.is_none() {
                Priority::Normal
            } else {
                Priority::Low
            };
            session.submit_refresh(
                &format!("records:{domain}"),
                priority,
                "records",
                &format!("Load records for {domain}"),
                ApiRequest::list_rrsets(domain),
            );
        }
        cached.map(|(records, _)| records)
    }

    /// Cached account info; enqueues a refresh when missing or stale.
    pub async fn account(&self) -> Option<AccountInfo> {
        let session = self.session.read().await;
        let cached = {
            let account = session
                .shared
                .account
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            account.clone()
        };
        let stale = match &cached {
            Some((_, fetched_at)) => {
                Utc::now() - *fetched_at
                    > chrono::Duration::minutes(i64::from(session.settings.sync_interval_minutes))
            }
            None => true,
        };
        if stale {
            session.submit_refresh(
                "account",
                Priority::Low,
                "account",
                "Load account info",
                ApiRequest::get_account(),
            );
        }
        cached.map(|(info, _)| info)
    }

    // ===== Versions =====

    /// Snapshot timeline of `zone`, newest first.
    pub async fn snapshots(&self, zone: &str) -> CoreResult<Vec<SnapshotRef>> {
        self.session.read().await.versions.list(zone)
    }

    /// Loads the state captured at `hash`.
    pub async fn read_snapshot(&self, zone: &str, hash: &str) -> CoreResult<SnapshotEntry> {
        self.session.read().await.versions.read(zone, hash)
    }

    /// Restores `zone` to the snapshot `hash` via a single bulk-put queue
    /// item. The store itself never mutates the service.
    pub async fn restore(&self, zone: &str, hash: &str) -> CoreResult<QueueHandle> {
        let (target, current) = {
            let session = self.session.read().await;
            let target = session.versions.read(zone, hash)?;
            let current = session
                .cache
                .records(zone)
                .map(|(records, _)| records)
                .unwrap_or_default();
            (target, current)
        };
        let payload = VersionStore::restore_payload(&current, &target);
        let short = &hash[..hash.len().min(8)];
        self.submit(
            Priority::Normal,
            "records",
            &format!("Restore {zone} to {short}"),
            ApiRequest::bulk_put_rrsets(zone, &payload),
        )
        .await
    }

    /// Drops all snapshots of `zone`.
    pub async fn delete_history(&self, zone: &str) -> CoreResult<bool> {
        self.session.read().await.versions.delete_history(zone)
    }

    // ===== Connectivity =====

    /// Last observed connectivity state.
    pub async fn online(&self) -> bool {
        self.session.read().await.shared.online.load(Ordering::SeqCst)
    }

    /// Toggles offline mode: pauses/resumes the queue and, when going
    /// online, enqueues a high-priority connectivity check.
    pub async fn set_offline(&self, offline: bool) -> CoreResult<()> {
        let mut session = self.session.write().await;
        if session.settings.offline_mode == offline {
            return Ok(());
        }
        session.settings.offline_mode = offline;
        let path = {
            let profiles = self
                .profiles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            profiles.config_path(&session.profile)
        };
        session.settings.save(&path)?;

        if offline {
            session.queue.pause();
            session.shared.online.store(false, Ordering::SeqCst);
            let _ = self.events_tx.send(CoreEvent::OnlineChanged(false));
        } else {
            session.queue.resume();
            session.queue.submit(
                Priority::High,
                "connectivity",
                "Connectivity check",
                ApiRequest::connectivity_check(),
            )?;
        }
        Ok(())
    }

    // ===== Credentials =====

    /// Seals and stores a new API token for the active profile, and swaps
    /// it into the running transport.
    pub async fn set_auth_token(&self, token: &str) -> CoreResult<()> {
        let mut session = self.session.write().await;
        let (config_path, salt_path) = {
            let profiles = self
                .profiles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (
                profiles.config_path(&session.profile),
                profiles.salt_path(&session.profile),
            )
        };
        let salt = credentials::ensure_salt(&salt_path)?;
        let sealed = credentials::seal(token, &credentials::machine_passphrase(), &salt)?;
        session.settings.sealed_token = Some(sealed);
        session.settings.save(&config_path)?;
        session.transport.set_token(Some(token.to_string())).await;
        Ok(())
    }

    // ===== Profiles =====

    /// All profiles, most recently used first.
    pub fn profiles(&self) -> Vec<crate::profiles::Profile> {
        self.profiles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .list()
    }

    /// Name of the active profile.
    pub async fn active_profile(&self) -> String {
        self.session.read().await.profile.clone()
    }

    pub fn create_profile(&self, name: &str, display_name: &str) -> CoreResult<()> {
        self.profiles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .create(name, display_name)
    }

    pub fn rename_profile(&self, name: &str, display_name: &str) -> CoreResult<()> {
        self.profiles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .rename(name, display_name)
    }

    pub fn delete_profile(&self, name: &str) -> CoreResult<()> {
        self.profiles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .delete(name)
    }

    /// Switches profiles: the old session is torn down (its queue drains the
    /// running item and stops) and every per-profile subsystem is rebuilt.
    pub async fn switch_profile(&self, name: &str) -> CoreResult<()> {
        let new_session = {
            let mut profiles = self
                .profiles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            profiles.switch(name)?;
            build_session(&profiles, name, &self.transport_factory, &self.events_tx)?
        };

        let old = {
            let mut session = self.session.write().await;
            std::mem::replace(&mut *session, new_session)
        };
        old.teardown().await;

        let _ = self.events_tx.send(CoreEvent::Notify {
            level: NotifyLevel::Info,
            title: "Profile switched".to_string(),
            message: format!("Now using profile '{name}'"),
        });
        let _ = self.events_tx.send(CoreEvent::QueueChanged);
        Ok(())
    }

    /// Application root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops the worker and router; call before exit so history persists.
    pub async fn shutdown(&self) {
        let session = self.session.read().await;
        if let Some(keepalive) = &session.keepalive {
            keepalive.abort();
        }
        session.queue.shutdown().await;
        session.router.abort();
    }
}

fn record_label(zone: &str, subname: &str) -> String {
    if subname.is_empty() || subname == "@" {
        zone.to_string()
    } else {
        format!("{subname}.{zone}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrsets_domain_extraction() {
        assert_eq!(rrsets_domain("/domains/example.com/rrsets/"), Some("example.com"));
        assert_eq!(
            rrsets_domain("/domains/example.com/rrsets/www/A/"),
            Some("example.com")
        );
        assert_eq!(rrsets_domain("/domains/"), None);
        assert_eq!(rrsets_domain("/domains/example.com/"), None);
        assert_eq!(rrsets_domain("/auth/tokens/"), None);
    }

    #[test]
    fn zone_item_name_extraction() {
        assert_eq!(zone_item_name("/domains/example.com/"), Some("example.com"));
        assert_eq!(zone_item_name("/domains/"), None);
        assert_eq!(zone_item_name("/domains/example.com/rrsets/"), None);
    }

    #[test]
    fn refresh_keys() {
        assert_eq!(
            refresh_key(&ApiRequest::list_zones()).as_deref(),
            Some("zones")
        );
        assert_eq!(
            refresh_key(&ApiRequest::list_rrsets("example.com")).as_deref(),
            Some("records:example.com")
        );
        assert_eq!(
            refresh_key(&ApiRequest::get_account()).as_deref(),
            Some("account")
        );
        assert_eq!(refresh_key(&ApiRequest::create_zone("x.com")), None);
    }

    #[test]
    fn validate_rejects_low_ttl_before_network() {
        let request = ApiRequest::create_rrset(
            "example.com",
            "www",
            "A",
            60,
            &["1.2.3.4".to_string()],
        );
        let err = validate_record_write(&request).unwrap_err();
        assert!(matches!(err, CoreError::Validation(ref v) if v.reason == "ttl<3600"));
    }

    #[test]
    fn validate_patch_uses_type_from_path() {
        let request = ApiRequest::update_rrset(
            "example.com",
            "www",
            "A",
            &RrsetPatch {
                ttl: None,
                records: Some(vec!["not-an-ip".to_string()]),
            },
        );
        assert!(validate_record_write(&request).is_err());
    }

    #[test]
    fn validate_bulk_put_skips_tombstones() {
        let request = ApiRequest::bulk_put_rrsets(
            "example.com",
            &[desec_desk_client::types::BulkRrset {
                subname: "old".into(),
                rtype: "A".into(),
                ttl: None,
                records: vec![],
            }],
        );
        assert!(validate_record_write(&request).is_ok());
    }

    #[test]
    fn validate_passes_non_record_requests() {
        assert!(validate_record_write(&ApiRequest::list_zones()).is_ok());
        assert!(validate_record_write(&ApiRequest::create_zone("x.com")).is_ok());
    }

    #[test]
    fn record_labels() {
        assert_eq!(record_label("example.com", ""), "example.com");
        assert_eq!(record_label("example.com", "@"), "example.com");
        assert_eq!(record_label("example.com", "www"), "www.example.com");
    }
}
