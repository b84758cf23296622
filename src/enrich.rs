//! The enrichment chain.
//!
//! A request's context is built by four stages, each refining the record
//! the previous one left behind:
//!
//! ```text
//! Create ──▶ Identity ──▶ Permissions ──▶ Environment
//! ```
//!
//! Stages are nodes of a dependency graph ([`Stage::requires`]), not calls a
//! handler has to sequence by hand. A consumer asks the per-request
//! [`Resolver`] for the stage it needs and the resolver runs whatever is
//! missing on the way there, in order, exactly once per request. Progress
//! is memoized under an async mutex, so the handler, guards and any other
//! consumer share one build. A failure is memoized as well: the stage that
//! failed and everything after it never run, and every later consumer gets
//! the same error.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ambient;
use crate::context::{ContextHandle, Permission, RequestContext, User};
use crate::error::ContextError;
use crate::lifecycle::{Lifecycle, Phase};
use crate::slot::RequestSlot;

// ── Stage graph ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Create,
    Identity,
    Permissions,
    Environment,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Self::Create, Self::Identity, Self::Permissions, Self::Environment];

    /// The stage whose output this one consumes.
    pub fn requires(self) -> Option<Stage> {
        match self {
            Self::Create      => None,
            Self::Identity    => Some(Self::Create),
            Self::Permissions => Some(Self::Identity),
            Self::Environment => Some(Self::Permissions),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create      => "create",
            Self::Identity    => "identity",
            Self::Permissions => "permissions",
            Self::Environment => "environment",
        }
    }

    /// `self` and its transitive dependencies, dependencies first.
    fn plan(self) -> Vec<Stage> {
        let mut plan = vec![self];
        let mut at = self;
        while let Some(dep) = at.requires() {
            plan.push(dep);
            at = dep;
        }
        plan.reverse();
        plan
    }

    fn index(self) -> usize {
        self as usize
    }
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Output of identity resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user: User,
    pub roles: Vec<String>,
}

/// Resolves who is making the request.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// # Errors
    ///
    /// [`ContextError::Unauthenticated`] when no identity can be established.
    async fn resolve(&self, ctx: &RequestContext) -> Result<Identity, ContextError>;
}

/// Always resolves to the same identity. No credential check.
#[derive(Clone, Debug)]
pub struct StaticIdentity(pub Identity);

impl Default for StaticIdentity {
    fn default() -> Self {
        Self(Identity {
            user: User { id: 1, name: "Tom".to_owned() },
            roles: vec!["admin".to_owned()],
        })
    }
}

#[async_trait]
impl IdentitySource for StaticIdentity {
    async fn resolve(&self, _ctx: &RequestContext) -> Result<Identity, ContextError> {
        Ok(self.0.clone())
    }
}

/// Output of environment resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenancy {
    pub env: String,
    pub tenant_id: u64,
}

/// Resolves the deployment environment and tenant of the request.
#[async_trait]
pub trait EnvironmentSource: Send + Sync {
    /// # Errors
    ///
    /// [`ContextError::EnvironmentUnavailable`] when the source cannot answer.
    async fn resolve(&self, ctx: &RequestContext) -> Result<Tenancy, ContextError>;
}

/// Always resolves to the same environment.
#[derive(Clone, Debug)]
pub struct StaticEnvironment(pub Tenancy);

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self(Tenancy { env: "gray".to_owned(), tenant_id: 1001 })
    }
}

#[async_trait]
impl EnvironmentSource for StaticEnvironment {
    async fn resolve(&self, _ctx: &RequestContext) -> Result<Tenancy, ContextError> {
        Ok(self.0.clone())
    }
}

/// Static role → permission table.
///
/// Every caller gets the baseline; each listed role adds its grants on top.
/// The default table is `admin → {read, write}` over a `{read}` baseline.
#[derive(Clone, Debug)]
pub struct PermissionPolicy {
    baseline: BTreeSet<Permission>,
    grants: Vec<(String, BTreeSet<Permission>)>,
}

impl PermissionPolicy {
    pub fn permissions_for(&self, roles: &[String]) -> BTreeSet<Permission> {
        let mut granted = self.baseline.clone();
        for (role, perms) in &self.grants {
            if roles.iter().any(|r| r == role) {
                granted.extend(perms.iter().copied());
            }
        }
        granted
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            baseline: BTreeSet::from([Permission::Read]),
            grants: vec![(
                "admin".to_owned(),
                BTreeSet::from([Permission::Read, Permission::Write]),
            )],
        }
    }
}

/// The collaborators every request's chain is built from. Shared by all
/// requests; the per-request state lives in [`Resolver`].
#[derive(Clone)]
pub struct Sources {
    pub identity: Arc<dyn IdentitySource>,
    pub environment: Arc<dyn EnvironmentSource>,
    pub policy: PermissionPolicy,
}

impl Sources {
    pub fn with_identity(mut self, source: impl IdentitySource + 'static) -> Self {
        self.identity = Arc::new(source);
        self
    }

    pub fn with_environment(mut self, source: impl EnvironmentSource + 'static) -> Self {
        self.environment = Arc::new(source);
        self
    }
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            identity: Arc::new(StaticIdentity::default()),
            environment: Arc::new(StaticEnvironment::default()),
            policy: PermissionPolicy::default(),
        }
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Progress {
    handle: Option<ContextHandle>,
    reached: Option<Stage>,
    failed: Option<ContextError>,
}

impl Progress {
    fn has_run(&self, stage: Stage) -> bool {
        self.reached.is_some_and(|r| r >= stage)
    }
}

/// Per-request, memoizing resolver of the stage graph.
///
/// Owns the request-scoped slot and the request's lifecycle, and is shared
/// (behind an `Arc`) by the [`Request`](crate::Request) and the dispatch
/// pipeline.
pub struct Resolver {
    seed: Option<String>,
    sources: Arc<Sources>,
    slot: RequestSlot,
    lifecycle: Lifecycle,
    progress: Mutex<Progress>,
    runs: [AtomicU32; 4],
}

impl Resolver {
    /// `seed` is the inbound `X-Request-ID`, if the client sent one.
    pub fn new(seed: Option<String>, sources: Arc<Sources>) -> Self {
        Self {
            seed,
            sources,
            slot: RequestSlot::new(),
            lifecycle: Lifecycle::new(),
            progress: Mutex::new(Progress::default()),
            runs: Default::default(),
        }
    }

    pub fn slot(&self) -> &RequestSlot {
        &self.slot
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// The record if some consumer already created it. Never runs a stage.
    pub fn peek(&self) -> Option<ContextHandle> {
        self.slot.get().cloned()
    }

    /// How many times `stage` ran for this request. Zero or one.
    pub fn runs(&self, stage: Stage) -> u32 {
        self.runs[stage.index()].load(Ordering::Relaxed)
    }

    /// The fully enriched record.
    pub async fn context(&self) -> Result<ContextHandle, ContextError> {
        self.resolve(Stage::Environment).await
    }

    /// Runs `target` and everything it depends on, skipping what already ran.
    ///
    /// # Errors
    ///
    /// The error of the first failing stage on the way to `target`, now or on
    /// an earlier call.
    pub async fn resolve(&self, target: Stage) -> Result<ContextHandle, ContextError> {
        let mut progress = self.progress.lock().await;

        let handle = match progress.handle.clone() {
            Some(handle) => handle,
            None => {
                let handle = self.step(&mut progress, Stage::Create, async { self.create() }).await?;
                progress.handle = Some(handle.clone());
                handle
            }
        };

        for stage in target.plan() {
            if progress.has_run(stage) {
                continue;
            }
            self.step(&mut progress, stage, self.enrich(stage, &handle)).await?;
        }

        Ok(handle)
    }

    async fn step<T>(
        &self,
        progress: &mut Progress,
        stage: Stage,
        work: impl Future<Output = Result<T, ContextError>>,
    ) -> Result<T, ContextError> {
        if let Some(err) = &progress.failed {
            return Err(err.clone());
        }

        self.lifecycle.advance(Phase::Enriching(stage));
        self.runs[stage.index()].fetch_add(1, Ordering::Relaxed);

        match work.await {
            Ok(out) => {
                debug!(stage = stage.as_str(), "context stage done");
                progress.reached = Some(stage);
                Ok(out)
            }
            Err(err) => {
                warn!(stage = stage.as_str(), error = %err, "context stage failed");
                progress.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn enrich(&self, stage: Stage, handle: &ContextHandle) -> Result<(), ContextError> {
        match stage {
            // Runs before any plan is walked.
            Stage::Create => Ok(()),
            Stage::Identity => {
                let identity = self.sources.identity.resolve(&handle.snapshot()).await?;
                handle.update(|ctx| {
                    ctx.user_id = Some(identity.user.id);
                    ctx.user = Some(identity.user);
                    ctx.roles = identity.roles;
                })
            }
            Stage::Permissions => {
                let policy = &self.sources.policy;
                handle.update(|ctx| {
                    let granted = policy.permissions_for(&ctx.roles);
                    ctx.permissions.extend(granted);
                })
            }
            Stage::Environment => {
                let tenancy = self.sources.environment.resolve(&handle.snapshot()).await?;
                handle.update(|ctx| {
                    ctx.env = tenancy.env;
                    ctx.tenant_id = Some(tenancy.tenant_id);
                })
            }
        }
    }

    fn create(&self) -> Result<ContextHandle, ContextError> {
        let request_id = match &self.seed {
            Some(id) => id.clone(),
            None => Uuid::new_v4().to_string(),
        };
        let handle = ContextHandle::new(RequestContext::new(request_id));
        self.slot.bind(handle.clone())?;

        if !ambient::bind(&handle) {
            debug!(
                request_id = %handle.request_id(),
                "no ambient scope on this task, context not published there"
            );
        }
        Ok(handle)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("seed", &self.seed)
            .field("slot", &self.slot)
            .field("phase", &self.lifecycle.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingIdentity {
        calls: Arc<AtomicU32>,
        result: Result<Identity, ContextError>,
    }

    #[async_trait]
    impl IdentitySource for CountingIdentity {
        async fn resolve(&self, _ctx: &RequestContext) -> Result<Identity, ContextError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.result.clone()
        }
    }

    struct CountingEnvironment {
        calls: Arc<AtomicU32>,
        result: Result<Tenancy, ContextError>,
    }

    #[async_trait]
    impl EnvironmentSource for CountingEnvironment {
        async fn resolve(&self, _ctx: &RequestContext) -> Result<Tenancy, ContextError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn resolver(seed: Option<&str>) -> Resolver {
        Resolver::new(seed.map(str::to_owned), Arc::new(Sources::default()))
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn plans_list_dependencies_first() {
        assert_eq!(Stage::Create.plan(), vec![Stage::Create]);
        assert_eq!(Stage::Environment.plan(), Stage::ALL.to_vec());
        assert_eq!(
            Stage::Permissions.plan(),
            vec![Stage::Create, Stage::Identity, Stage::Permissions]
        );
    }

    #[test]
    fn policy_table() {
        let policy = PermissionPolicy::default();
        let rw = BTreeSet::from([Permission::Read, Permission::Write]);
        let r = BTreeSet::from([Permission::Read]);

        assert_eq!(policy.permissions_for(&roles(&[])), r);
        assert_eq!(policy.permissions_for(&roles(&["admin"])), rw);
        assert_eq!(policy.permissions_for(&roles(&["viewer"])), r);
        assert_eq!(policy.permissions_for(&roles(&["viewer", "admin"])), rw);
        assert_eq!(policy.permissions_for(&roles(&["Admin"])), r);
    }

    #[tokio::test]
    async fn full_chain_enriches_one_record() {
        let r = resolver(Some("abc123"));
        let handle = r.context().await.unwrap();
        let ctx = handle.snapshot();

        assert_eq!(ctx.request_id, "abc123");
        assert_eq!(ctx.user_id, Some(1));
        assert_eq!(ctx.user, Some(User { id: 1, name: "Tom".into() }));
        assert_eq!(ctx.roles, roles(&["admin"]));
        assert_eq!(ctx.permissions, BTreeSet::from([Permission::Read, Permission::Write]));
        assert_eq!(ctx.env, "gray");
        assert_eq!(ctx.tenant_id, Some(1001));
        assert!(r.peek().unwrap().ptr_eq(&handle));
        assert_eq!(r.lifecycle().current(), Phase::Enriching(Stage::Environment));
    }

    #[tokio::test]
    async fn generated_request_ids_are_fresh_uuids() {
        let a = resolver(None).resolve(Stage::Create).await.unwrap().request_id();
        let b = resolver(None).resolve(Stage::Create).await.unwrap().request_id();

        assert!(Uuid::parse_str(&a).is_ok());
        assert!(Uuid::parse_str(&b).is_ok());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn stages_run_once_whatever_the_number_of_consumers() {
        let calls = Arc::new(AtomicU32::new(0));
        let sources = Sources::default().with_identity(CountingIdentity {
            calls: Arc::clone(&calls),
            result: Ok(StaticIdentity::default().0),
        });
        let r = Resolver::new(None, Arc::new(sources));

        let (a, b) = tokio::join!(r.context(), r.context());
        let c = r.resolve(Stage::Identity).await.unwrap();
        let d = r.context().await.unwrap();

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.ptr_eq(&b) && a.ptr_eq(&c) && a.ptr_eq(&d));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for stage in Stage::ALL {
            assert_eq!(r.runs(stage), 1, "{stage:?}");
        }
    }

    #[tokio::test]
    async fn resolving_an_early_stage_leaves_later_ones_unrun() {
        let r = resolver(None);
        let handle = r.resolve(Stage::Identity).await.unwrap();

        assert_eq!(r.runs(Stage::Permissions), 0);
        assert!(handle.snapshot().permissions.is_empty());
        assert_eq!(handle.snapshot().env, "prod");
    }

    #[tokio::test]
    async fn identity_failure_aborts_the_chain_and_is_memoized() {
        let identity_calls = Arc::new(AtomicU32::new(0));
        let env_calls = Arc::new(AtomicU32::new(0));
        let sources = Sources::default()
            .with_identity(CountingIdentity {
                calls: Arc::clone(&identity_calls),
                result: Err(ContextError::Unauthenticated("no session".into())),
            })
            .with_environment(CountingEnvironment {
                calls: Arc::clone(&env_calls),
                result: Ok(StaticEnvironment::default().0),
            });
        let r = Resolver::new(None, Arc::new(sources));

        let first = r.context().await.unwrap_err();
        let second = r.resolve(Stage::Permissions).await.unwrap_err();

        assert_eq!(first, ContextError::Unauthenticated("no session".into()));
        assert_eq!(second, first);
        assert_eq!(identity_calls.load(Ordering::SeqCst), 1);
        assert_eq!(env_calls.load(Ordering::SeqCst), 0);
        assert_eq!(r.runs(Stage::Permissions), 0);

        // The record exists but only the create stage touched it.
        let partial = r.peek().unwrap().snapshot();
        assert!(partial.roles.is_empty());
        assert_eq!(partial.user, None);
    }

    #[tokio::test]
    async fn environment_failure_keeps_earlier_stages_usable() {
        let env_calls = Arc::new(AtomicU32::new(0));
        let sources = Sources::default().with_environment(CountingEnvironment {
            calls: Arc::clone(&env_calls),
            result: Err(ContextError::EnvironmentUnavailable("tenant service down".into())),
        });
        let r = Resolver::new(None, Arc::new(sources));

        assert!(matches!(
            r.context().await,
            Err(ContextError::EnvironmentUnavailable(_))
        ));
        assert!(r.context().await.is_err());
        let handle = r.resolve(Stage::Permissions).await.unwrap();

        assert_eq!(env_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.snapshot().roles, roles(&["admin"]));
        assert_eq!(handle.snapshot().tenant_id, None);
    }

    #[tokio::test]
    async fn create_publishes_to_the_ambient_scope_it_runs_in() {
        let r = resolver(None);
        ambient::scope(async {
            let handle = r.resolve(Stage::Create).await.unwrap();
            assert!(ambient::current().unwrap().ptr_eq(&handle));
        })
        .await;
    }

    #[tokio::test]
    async fn create_on_a_spawned_task_misses_the_ambient_scope() {
        let r = Arc::new(resolver(None));
        ambient::scope(async {
            let worker = Arc::clone(&r);
            tokio::spawn(async move { worker.context().await })
                .await
                .unwrap()
                .unwrap();

            assert!(r.peek().is_some());
            assert!(ambient::current().is_none());
        })
        .await;
    }
}
