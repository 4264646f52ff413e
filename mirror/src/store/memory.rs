//! Store kept entirely in process memory. Nothing survives a restart; used
//! for local development, tests, and as the state behind [`super::FilesystemStore`].
use super::{Dataset, Reader, StoreError, Writer};
use crate::types::{
    AppStatus, Application, Blockchain, LoadBalancer, Redirect, UpdateApplication,
    UpdateFirstDateSurpassed, UpdateLoadBalancer, requested,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub struct MemoryStore {
    data: RwLock<Dataset>,
}

impl MemoryStore {
    pub fn new(dataset: Dataset) -> Self {
        MemoryStore {
            data: RwLock::new(dataset),
        }
    }

    pub async fn snapshot(&self) -> Dataset {
        self.data.read().await.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(Dataset::default())
    }
}

fn check_plan(data: &Dataset, plan_type: Option<&String>) -> Result<(), StoreError> {
    match plan_type {
        Some(plan_type) if !data.pay_plans.iter().any(|p| &p.plan_type == plan_type) => {
            Err(StoreError::not_found("pay plan", plan_type))
        }
        _ => Ok(()),
    }
}

fn find_application<'a>(
    data: &'a mut Dataset,
    id: &str,
) -> Result<&'a mut Application, StoreError> {
    data.applications
        .iter_mut()
        .find(|app| app.id == id)
        .ok_or_else(|| StoreError::not_found("application", id))
}

fn find_load_balancer<'a>(
    data: &'a mut Dataset,
    id: &str,
) -> Result<&'a mut LoadBalancer, StoreError> {
    data.load_balancers
        .iter_mut()
        .find(|lb| lb.id == id)
        .ok_or_else(|| StoreError::not_found("load balancer", id))
}

#[async_trait]
impl Reader for MemoryStore {
    async fn read_dataset(&self) -> Result<Dataset, StoreError> {
        Ok(self.snapshot().await)
    }
}

#[async_trait]
impl Writer for MemoryStore {
    async fn write_application(&self, mut app: Application) -> Result<Application, StoreError> {
        let mut data = self.data.write().await;

        if app.id.is_empty() {
            app.id = new_id();
        } else if data.applications.iter().any(|a| a.id == app.id) {
            return Err(StoreError::conflict("application", &app.id));
        }
        check_plan(&data, requested(&app.pay_plan_type))?;

        let now = Utc::now();
        app.created_at = Some(now);
        app.updated_at = Some(now);
        data.applications.push(app.clone());
        Ok(app)
    }

    async fn update_application(
        &self,
        id: &str,
        update: &UpdateApplication,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let plan_type = requested(&update.pay_plan_type);
        check_plan(&data, plan_type)?;

        let app = find_application(&mut data, id)?;
        app.merge(update);
        if let Some(plan_type) = plan_type {
            app.pay_plan_type = Some(plan_type.clone());
        }
        app.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_first_date_surpassed(
        &self,
        update: &UpdateFirstDateSurpassed,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if let Some(missing) = update
            .application_ids
            .iter()
            .find(|id| !data.applications.iter().any(|app| &app.id == *id))
        {
            return Err(StoreError::not_found("application", missing));
        }

        let now = Utc::now();
        for app in data
            .applications
            .iter_mut()
            .filter(|app| update.application_ids.contains(&app.id))
        {
            app.first_date_surpassed = Some(update.first_date_surpassed);
            app.updated_at = Some(now);
        }
        Ok(())
    }

    async fn remove_application(&self, id: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let app = find_application(&mut data, id)?;
        app.status = AppStatus::AwaitingGracePeriod;
        app.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn write_load_balancer(&self, mut lb: LoadBalancer) -> Result<LoadBalancer, StoreError> {
        let mut data = self.data.write().await;

        if lb.id.is_empty() {
            lb.id = new_id();
        } else if data.load_balancers.iter().any(|l| l.id == lb.id) {
            return Err(StoreError::conflict("load balancer", &lb.id));
        }
        if let Some(missing) = lb
            .application_ids
            .iter()
            .find(|id| !data.applications.iter().any(|app| &app.id == *id))
        {
            return Err(StoreError::not_found("application", missing));
        }

        let now = Utc::now();
        lb.applications = Vec::new();
        lb.created_at = Some(now);
        lb.updated_at = Some(now);
        data.load_balancers.push(lb.clone());
        Ok(lb)
    }

    async fn update_load_balancer(
        &self,
        id: &str,
        update: &UpdateLoadBalancer,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let lb = find_load_balancer(&mut data, id)?;
        lb.merge(update);
        lb.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn remove_load_balancer(&self, id: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let lb = find_load_balancer(&mut data, id)?;
        lb.user_id = String::new();
        lb.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn write_blockchain(&self, mut blockchain: Blockchain) -> Result<Blockchain, StoreError> {
        let mut data = self.data.write().await;

        if blockchain.id.is_empty() {
            blockchain.id = new_id();
        } else if data.blockchains.iter().any(|b| b.id == blockchain.id) {
            return Err(StoreError::conflict("blockchain", &blockchain.id));
        }

        let now = Utc::now();
        blockchain.created_at = Some(now);
        blockchain.updated_at = Some(now);
        for redirect in blockchain.redirects.iter_mut() {
            redirect.blockchain_id = blockchain.id.clone();
            redirect.created_at = Some(now);
            redirect.updated_at = Some(now);
        }

        // Redirects live in their own collection, as in the relational schema
        let mut stored = blockchain.clone();
        data.redirects.append(&mut stored.redirects);
        data.blockchains.push(stored);
        Ok(blockchain)
    }

    async fn activate_blockchain(&self, id: &str, active: bool) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let blockchain = data
            .blockchains
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| StoreError::not_found("blockchain", id))?;
        blockchain.active = active;
        blockchain.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn write_redirect(&self, mut redirect: Redirect) -> Result<Redirect, StoreError> {
        let mut data = self.data.write().await;
        if !data.blockchains.iter().any(|b| b.id == redirect.blockchain_id) {
            return Err(StoreError::not_found("blockchain", &redirect.blockchain_id));
        }

        let now = Utc::now();
        redirect.created_at = Some(now);
        redirect.updated_at = Some(now);
        data.redirects.push(redirect.clone());
        Ok(redirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PayPlan;

    fn store() -> MemoryStore {
        MemoryStore::new(Dataset {
            pay_plans: vec![PayPlan::new("FREETIER_V0", 250_000)],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_write_assigns_id_and_timestamps() {
        let store = store();
        let app = store
            .write_application(Application {
                name: "wallet".into(),
                pay_plan_type: Some("FREETIER_V0".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(app.id.len(), 32);
        assert!(app.created_at.is_some());
        assert_eq!(store.snapshot().await.applications, vec![app.clone()]);

        // Writing the same identifier twice conflicts
        let result = store.write_application(app).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_unknown_references_are_rejected() {
        let store = store();
        let result = store
            .write_application(Application {
                pay_plan_type: Some("NO_SUCH_PLAN".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        let result = store
            .write_load_balancer(LoadBalancer {
                application_ids: vec!["missing".into()],
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        let result = store
            .write_redirect(Redirect {
                blockchain_id: "0021".into(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        assert_eq!(store.snapshot().await.rows(), 1);
    }

    #[tokio::test]
    async fn test_blockchain_redirects_are_stored_separately() {
        let store = store();
        let blockchain = store
            .write_blockchain(Blockchain {
                id: "0021".into(),
                redirects: vec![Redirect {
                    alias: "eth-mainnet".into(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(blockchain.redirects[0].blockchain_id, "0021");

        let data = store.snapshot().await;
        assert!(data.blockchains[0].redirects.is_empty());
        assert_eq!(data.redirects.len(), 1);
        assert_eq!(data.redirects[0].blockchain_id, "0021");
    }

    #[tokio::test]
    async fn test_updates_and_removal() {
        let store = store();
        let app = store
            .write_application(Application {
                name: "wallet".into(),
                user_id: "user1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        store
            .update_application(
                &app.id,
                &UpdateApplication {
                    name: Some("".into()),
                    pay_plan_type: Some("FREETIER_V0".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.remove_application(&app.id).await.unwrap();

        let stored = &store.snapshot().await.applications[0];
        assert_eq!(stored.name, "wallet");
        assert_eq!(stored.pay_plan_type.as_deref(), Some("FREETIER_V0"));
        assert_eq!(stored.status, AppStatus::AwaitingGracePeriod);

        let result = store.remove_application("missing").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
