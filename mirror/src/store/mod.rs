//! The durable system of record. The cache reads a full [`Dataset`] from a
//! [`Reader`] once at startup; request handlers write through a [`Writer`]
//! and replay confirmed writes into the cache.
use crate::types::{
    Application, Blockchain, LoadBalancer, PayPlan, Redirect, UpdateApplication,
    UpdateFirstDateSurpassed, UpdateLoadBalancer,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;

mod filesystem;
mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

/// Every entity currently held by the store. Redirects are listed on their
/// own, the way the relational store keeps them, and are joined onto their
/// blockchain by the cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub pay_plans: Vec<PayPlan>,
    pub blockchains: Vec<Blockchain>,
    pub redirects: Vec<Redirect>,
    pub applications: Vec<Application>,
    pub load_balancers: Vec<LoadBalancer>,
}

impl Dataset {
    pub fn rows(&self) -> usize {
        self.pay_plans.len()
            + self.blockchains.len()
            + self.redirects.len()
            + self.applications.len()
            + self.load_balancers.len()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn conflict(entity: &'static str, id: &str) -> Self {
        StoreError::Conflict {
            entity,
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait Reader: Send + Sync {
    async fn read_dataset(&self) -> Result<Dataset, StoreError>;
}

/// Durable writes. Each create returns the record as persisted, with
/// identifier and timestamps filled in.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write_application(&self, app: Application) -> Result<Application, StoreError>;
    async fn update_application(
        &self,
        id: &str,
        update: &UpdateApplication,
    ) -> Result<(), StoreError>;
    async fn update_first_date_surpassed(
        &self,
        update: &UpdateFirstDateSurpassed,
    ) -> Result<(), StoreError>;
    async fn remove_application(&self, id: &str) -> Result<(), StoreError>;

    async fn write_load_balancer(&self, lb: LoadBalancer) -> Result<LoadBalancer, StoreError>;
    async fn update_load_balancer(
        &self,
        id: &str,
        update: &UpdateLoadBalancer,
    ) -> Result<(), StoreError>;
    async fn remove_load_balancer(&self, id: &str) -> Result<(), StoreError>;

    async fn write_blockchain(&self, blockchain: Blockchain) -> Result<Blockchain, StoreError>;
    async fn activate_blockchain(&self, id: &str, active: bool) -> Result<(), StoreError>;
    async fn write_redirect(&self, redirect: Redirect) -> Result<Redirect, StoreError>;
}

pub trait Store: Reader + Writer {}

impl<T: Reader + Writer> Store for T {}
