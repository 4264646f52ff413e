//! In-memory mirror of the store, serving every read of the API.
//!
//! The cache is populated once from a bulk store read and from then on only
//! changes when a request handler replays a store write that already
//! succeeded. It never talks to the store on its own, never logs, and never
//! suspends: every operation is a synchronous lookup or merge under one
//! `parking_lot::RwLock`.
//!
//! Lookups hand out owned snapshots cloned under the read guard. A mutation
//! builds the merged value on a copy and installs it while the write guard
//! is held, so a concurrent reader sees either the whole old object or the
//! whole new one.
//!
//! Pay plan limits are joined onto applications when an application is
//! created or its plan changes. Plans are read-only here, so there is no
//! reverse index from a plan to the applications using it.
use crate::store::{Dataset, Reader, StoreError};
use crate::types::{
    AppId, AppLimits, AppStatus, Application, Blockchain, BlockchainId, LoadBalancer,
    LoadBalancerId, PayPlan, PlanType, Redirect, UpdateApplication, UpdateLoadBalancer, UserId,
    requested,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} references unknown {reference} {reference_id}")]
    InconsistentReference {
        entity: &'static str,
        id: String,
        reference: &'static str,
        reference_id: String,
    },

    #[error("could not read dataset from store: {0}")]
    PopulationFailure(#[from] StoreError),
}

impl CacheError {
    fn not_found(entity: &'static str, id: &str) -> Self {
        CacheError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    fn inconsistent(
        entity: &'static str,
        id: &str,
        reference: &'static str,
        reference_id: &str,
    ) -> Self {
        CacheError::InconsistentReference {
            entity,
            id: id.to_string(),
            reference,
            reference_id: reference_id.to_string(),
        }
    }
}

/// Number of entities held by each primary index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub pay_plans: usize,
    pub blockchains: usize,
    pub applications: usize,
    pub load_balancers: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.pay_plans + self.blockchains + self.applications + self.load_balancers
    }
}

#[derive(Default)]
struct Indices {
    pay_plans: HashMap<PlanType, PayPlan>,
    blockchains: HashMap<BlockchainId, Blockchain>,
    applications: HashMap<AppId, Application>,
    // Load balancers keep their member IDs; member applications are
    // materialized on every read.
    load_balancers: HashMap<LoadBalancerId, LoadBalancer>,
    apps_by_user: HashMap<UserId, BTreeSet<AppId>>,
    lbs_by_user: HashMap<UserId, BTreeSet<LoadBalancerId>>,
}

fn add_owned(index: &mut HashMap<UserId, BTreeSet<String>>, user_id: &str, id: &str) {
    if user_id.is_empty() {
        return;
    }
    index
        .entry(user_id.to_string())
        .or_default()
        .insert(id.to_string());
}

fn remove_owned(index: &mut HashMap<UserId, BTreeSet<String>>, user_id: &str, id: &str) {
    if let Some(ids) = index.get_mut(user_id) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(user_id);
        }
    }
}

/// Refreshes the derived `limits` of `app`. Plan fields only change when a
/// plan is given; the denormalized copies always follow the application.
fn assemble_limits(app: &mut Application, plan: Option<&PayPlan>) {
    if let Some(plan) = plan {
        app.limits.plan_type = plan.plan_type.clone();
        app.limits.daily_limit = plan.daily_limit;
    }
    app.limits.app_id = app.id.clone();
    app.limits.app_name = app.name.clone();
    app.limits.app_user_id = app.user_id.clone();
    app.limits.public_key = app.gateway_aat.application_public_key.clone();
    app.limits.notification_settings = app.notification_settings.clone();
    app.limits.first_date_surpassed = requested(&app.first_date_surpassed).copied();
    app.pay_plan_type = None;
}

impl Indices {
    fn from_dataset(dataset: Dataset) -> Result<Self, CacheError> {
        let mut indices = Indices::default();

        for plan in dataset.pay_plans {
            indices.pay_plans.insert(plan.plan_type.clone(), plan);
        }
        for blockchain in dataset.blockchains {
            indices.insert_blockchain(blockchain);
        }
        for redirect in dataset.redirects {
            indices.attach_redirect(redirect)?;
        }
        for app in dataset.applications {
            indices.insert_application(app)?;
        }
        for lb in dataset.load_balancers {
            indices.insert_load_balancer(lb)?;
        }

        Ok(indices)
    }

    fn counts(&self) -> Counts {
        Counts {
            pay_plans: self.pay_plans.len(),
            blockchains: self.blockchains.len(),
            applications: self.applications.len(),
            load_balancers: self.load_balancers.len(),
        }
    }

    fn resolve_plan(&self, entity_id: &str, plan_type: &str) -> Result<&PayPlan, CacheError> {
        self.pay_plans
            .get(plan_type)
            .ok_or_else(|| CacheError::inconsistent("application", entity_id, "pay plan", plan_type))
    }

    fn insert_blockchain(&mut self, mut blockchain: Blockchain) -> Blockchain {
        for redirect in blockchain.redirects.iter_mut() {
            redirect.blockchain_id = blockchain.id.clone();
        }
        self.blockchains
            .insert(blockchain.id.clone(), blockchain.clone());
        blockchain
    }

    fn attach_redirect(&mut self, redirect: Redirect) -> Result<Redirect, CacheError> {
        let blockchain = self
            .blockchains
            .get_mut(&redirect.blockchain_id)
            .ok_or_else(|| {
                CacheError::inconsistent(
                    "redirect",
                    &redirect.alias,
                    "blockchain",
                    &redirect.blockchain_id,
                )
            })?;
        blockchain.redirects.push(redirect.clone());
        Ok(redirect)
    }

    fn insert_application(&mut self, mut app: Application) -> Result<Application, CacheError> {
        let plan = match requested(&app.pay_plan_type) {
            Some(plan_type) => Some(self.resolve_plan(&app.id, plan_type)?.clone()),
            None => None,
        };
        assemble_limits(&mut app, plan.as_ref());

        if let Some(previous) = self.applications.insert(app.id.clone(), app.clone()) {
            remove_owned(&mut self.apps_by_user, &previous.user_id, &previous.id);
        }
        add_owned(&mut self.apps_by_user, &app.user_id, &app.id);
        Ok(app)
    }

    fn insert_load_balancer(&mut self, mut lb: LoadBalancer) -> Result<LoadBalancer, CacheError> {
        if let Some(missing) = lb
            .application_ids
            .iter()
            .find(|id| !self.applications.contains_key(*id))
        {
            return Err(CacheError::inconsistent(
                "load balancer",
                &lb.id,
                "application",
                missing,
            ));
        }
        lb.applications = Vec::new();

        if let Some(previous) = self.load_balancers.insert(lb.id.clone(), lb.clone()) {
            remove_owned(&mut self.lbs_by_user, &previous.user_id, &previous.id);
        }
        add_owned(&mut self.lbs_by_user, &lb.user_id, &lb.id);
        Ok(self.materialize(&lb))
    }

    /// Copy of `lb` with its member applications resolved and the raw ID
    /// list cleared.
    fn materialize(&self, lb: &LoadBalancer) -> LoadBalancer {
        let mut lb = lb.clone();
        lb.applications = lb
            .application_ids
            .iter()
            .filter_map(|id| self.applications.get(id).cloned())
            .collect();
        lb.application_ids = Vec::new();
        lb
    }
}

pub struct Cache {
    data: RwLock<Indices>,
}

impl Cache {
    /// Builds the cache from one bulk read of `reader`. Startup must abort
    /// on error: there is no partially populated cache to fall back to.
    pub async fn populate<R: Reader + ?Sized>(reader: &R) -> Result<Self, CacheError> {
        let dataset = reader.read_dataset().await?;
        Cache::from_dataset(dataset)
    }

    /// Builds the cache from a dataset that was already read. Fails on any
    /// dangling reference between entities.
    pub fn from_dataset(dataset: Dataset) -> Result<Self, CacheError> {
        Ok(Cache {
            data: RwLock::new(Indices::from_dataset(dataset)?),
        })
    }

    pub fn counts(&self) -> Counts {
        self.data.read().counts()
    }

    pub fn get_pay_plan(&self, plan_type: &str) -> Option<PayPlan> {
        self.data.read().pay_plans.get(plan_type).cloned()
    }

    pub fn list_pay_plans(&self) -> Vec<PayPlan> {
        self.data.read().pay_plans.values().cloned().collect()
    }

    pub fn get_blockchain(&self, id: &str) -> Option<Blockchain> {
        self.data.read().blockchains.get(id).cloned()
    }

    pub fn list_blockchains(&self) -> Vec<Blockchain> {
        self.data.read().blockchains.values().cloned().collect()
    }

    pub fn get_application(&self, id: &str) -> Option<Application> {
        self.data.read().applications.get(id).cloned()
    }

    pub fn list_applications(&self) -> Vec<Application> {
        self.data.read().applications.values().cloned().collect()
    }

    /// Applications owned by `user_id`; empty when the user owns none.
    pub fn list_applications_by_user(&self, user_id: &str) -> Vec<Application> {
        let read_guard = self.data.read();
        read_guard
            .apps_by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| read_guard.applications.get(id).cloned())
            .collect()
    }

    pub fn list_app_limits(&self) -> Vec<AppLimits> {
        self.data
            .read()
            .applications
            .values()
            .map(|app| app.limits.clone())
            .collect()
    }

    pub fn get_load_balancer(&self, id: &str) -> Option<LoadBalancer> {
        let read_guard = self.data.read();
        read_guard
            .load_balancers
            .get(id)
            .map(|lb| read_guard.materialize(lb))
    }

    pub fn list_load_balancers(&self) -> Vec<LoadBalancer> {
        let read_guard = self.data.read();
        read_guard
            .load_balancers
            .values()
            .map(|lb| read_guard.materialize(lb))
            .collect()
    }

    /// Load balancers owned by `user_id`; empty when the user owns none.
    pub fn list_load_balancers_by_user(&self, user_id: &str) -> Vec<LoadBalancer> {
        let read_guard = self.data.read();
        read_guard
            .lbs_by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| read_guard.load_balancers.get(id))
            .map(|lb| read_guard.materialize(lb))
            .collect()
    }

    /// Inserts an application returned by the store. Its pay plan is joined
    /// into `limits` and `pay_plan_type` is cleared on the cached and
    /// returned copy.
    pub fn apply_create_application(&self, app: Application) -> Result<Application, CacheError> {
        self.data.write().insert_application(app)
    }

    /// Sentinel merge of `update` into the cached application.
    pub fn apply_update_application(
        &self,
        id: &str,
        update: &UpdateApplication,
    ) -> Result<Application, CacheError> {
        let mut write_guard = self.data.write();

        let mut app = write_guard
            .applications
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::not_found("application", id))?;
        let plan = match requested(&update.pay_plan_type) {
            Some(plan_type) => Some(write_guard.resolve_plan(id, plan_type)?.clone()),
            None => None,
        };

        app.merge(update);
        assemble_limits(&mut app, plan.as_ref());
        write_guard.applications.insert(app.id.clone(), app.clone());
        Ok(app)
    }

    /// Soft removal: the application stays indexed, in a terminal status.
    pub fn apply_remove_application(&self, id: &str) -> Result<Application, CacheError> {
        let mut write_guard = self.data.write();
        let app = write_guard
            .applications
            .get_mut(id)
            .ok_or_else(|| CacheError::not_found("application", id))?;
        app.status = AppStatus::AwaitingGracePeriod;
        Ok(app.clone())
    }

    /// Sets `first_date_surpassed` on every listed application, or on none
    /// of them if any is unknown.
    pub fn apply_first_date_surpassed(
        &self,
        ids: &[AppId],
        first_date_surpassed: DateTime<Utc>,
    ) -> Result<Vec<Application>, CacheError> {
        let mut write_guard = self.data.write();
        if let Some(missing) = ids
            .iter()
            .find(|id| !write_guard.applications.contains_key(*id))
        {
            return Err(CacheError::not_found("application", missing));
        }

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(app) = write_guard.applications.get_mut(id) {
                app.first_date_surpassed = Some(first_date_surpassed);
                assemble_limits(app, None);
                updated.push(app.clone());
            }
        }
        Ok(updated)
    }

    /// Inserts a load balancer returned by the store. The returned copy has
    /// its member applications resolved from the cache.
    pub fn apply_create_load_balancer(
        &self,
        lb: LoadBalancer,
    ) -> Result<LoadBalancer, CacheError> {
        self.data.write().insert_load_balancer(lb)
    }

    pub fn apply_update_load_balancer(
        &self,
        id: &str,
        update: &UpdateLoadBalancer,
    ) -> Result<LoadBalancer, CacheError> {
        let mut write_guard = self.data.write();
        let lb = write_guard
            .load_balancers
            .get_mut(id)
            .ok_or_else(|| CacheError::not_found("load balancer", id))?;
        lb.merge(update);

        let lb = lb.clone();
        Ok(write_guard.materialize(&lb))
    }

    /// Soft removal: the load balancer loses its owner and leaves the
    /// owner's index, but stays retrievable by ID.
    pub fn apply_remove_load_balancer(&self, id: &str) -> Result<LoadBalancer, CacheError> {
        let mut write_guard = self.data.write();
        let lb = write_guard
            .load_balancers
            .get_mut(id)
            .ok_or_else(|| CacheError::not_found("load balancer", id))?;
        let user_id = std::mem::take(&mut lb.user_id);

        let lb = lb.clone();
        remove_owned(&mut write_guard.lbs_by_user, &user_id, id);
        Ok(write_guard.materialize(&lb))
    }

    pub fn apply_create_blockchain(&self, blockchain: Blockchain) -> Blockchain {
        self.data.write().insert_blockchain(blockchain)
    }

    pub fn apply_activate_blockchain(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Blockchain, CacheError> {
        let mut write_guard = self.data.write();
        let blockchain = write_guard
            .blockchains
            .get_mut(id)
            .ok_or_else(|| CacheError::not_found("blockchain", id))?;
        blockchain.active = active;
        Ok(blockchain.clone())
    }

    /// Appends a redirect returned by the store to its blockchain.
    pub fn apply_create_redirect(&self, redirect: Redirect) -> Result<Redirect, CacheError> {
        self.data.write().attach_redirect(redirect)
    }
}
