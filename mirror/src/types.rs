//! Entity records mirrored by the cache, and the partial-update requests
//! replayed into it after a successful store write.
//!
//! Records are plain data. The only behavior here is the zero-value sentinel
//! used by update requests and the validation that rejects malformed updates
//! before they reach the store.
use chrono::{DateTime, Utc};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};

pub type AppId = String;
pub type LoadBalancerId = String;
pub type BlockchainId = String;
pub type UserId = String;
pub type PlanType = String;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPlan {
    pub plan_type: PlanType,
    pub daily_limit: u64,
}

impl PayPlan {
    pub fn new<P: Into<String>>(plan_type: P, daily_limit: u64) -> Self {
        PayPlan {
            plan_type: plan_type.into(),
            daily_limit,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncCheckOptions {
    pub body: String,
    pub path: String,
    pub result_key: String,
    pub allowance: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Redirect {
    #[serde(rename = "blockchainID")]
    pub blockchain_id: BlockchainId,
    pub alias: String,
    #[serde(rename = "loadbalancer", alias = "loadBalancerID")]
    pub load_balancer_id: LoadBalancerId,
    pub domain: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Blockchain {
    #[serde(rename = "blockchainID")]
    pub id: BlockchainId,
    pub altruist: String,
    pub blockchain: String,
    #[serde(rename = "chainID")]
    pub chain_id: String,
    #[serde(rename = "chainIDCheck")]
    pub chain_id_check: String,
    pub description: String,
    pub enforce_result: String,
    pub network: String,
    pub path: String,
    pub sync_check: String,
    pub ticker: String,
    pub blockchain_aliases: Vec<String>,
    pub log_limit_blocks: u64,
    pub request_timeout: u64,
    pub sync_allowance: u64,
    pub active: bool,
    pub redirects: Vec<Redirect>,
    pub sync_check_options: Option<SyncCheckOptions>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    AwaitingFreetierFunds,
    AwaitingFreetierStake,
    AwaitingGracePeriod,
    AwaitingSlotFunds,
    AwaitingSlotStake,
    AwaitingUpdate,
    Decomissioned,
    #[default]
    InService,
    Orphaned,
    Ready,
}

/// Gateway application authentication token. Written once at creation and
/// never touched by an update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayAat {
    pub address: String,
    pub application_public_key: String,
    pub application_signature: String,
    pub client_public_key: String,
    pub private_key: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub secret_key: String,
    pub secret_key_required: bool,
    pub whitelist_origins: Vec<String>,
    pub whitelist_user_agents: Vec<String>,
    pub whitelist_contracts: Vec<WhitelistContract>,
    pub whitelist_methods: Vec<WhitelistMethod>,
    pub whitelist_blockchains: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhitelistContract {
    #[serde(rename = "blockchainID")]
    pub blockchain_id: BlockchainId,
    pub contracts: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhitelistMethod {
    #[serde(rename = "blockchainID")]
    pub blockchain_id: BlockchainId,
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub signed_up: bool,
    pub quarter: bool,
    pub half: bool,
    pub three_quarters: bool,
    pub full: bool,
}

/// Relay limits of an application, joined from its pay plan and
/// denormalized from the application itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppLimits {
    #[serde(rename = "appID")]
    pub app_id: AppId,
    pub app_name: String,
    #[serde(rename = "appUserID")]
    pub app_user_id: UserId,
    pub public_key: String,
    pub plan_type: PlanType,
    pub daily_limit: u64,
    pub first_date_surpassed: Option<DateTime<Utc>>,
    pub notification_settings: Option<NotificationSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Application {
    pub id: AppId,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub name: String,
    pub status: AppStatus,
    pub contact_email: String,
    pub description: String,
    pub owner: String,
    pub url: String,
    pub dummy: bool,
    /// Source of `limits`. Cleared once the plan has been joined in, so the
    /// mirror never exposes both representations at once.
    pub pay_plan_type: Option<PlanType>,
    pub first_date_surpassed: Option<DateTime<Utc>>,
    #[serde(rename = "gatewayAAT")]
    pub gateway_aat: GatewayAat,
    pub gateway_settings: Option<GatewaySettings>,
    pub notification_settings: Option<NotificationSettings>,
    pub limits: AppLimits,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StickinessOptions {
    pub duration: String,
    pub sticky_origins: Vec<String>,
    pub sticky_max: u64,
    pub stickiness: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadBalancer {
    pub id: LoadBalancerId,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub name: String,
    pub request_timeout: u64,
    pub gigastake: bool,
    pub gigastake_redirect: bool,
    #[serde(rename = "stickinessOptions")]
    pub sticky_options: Option<StickinessOptions>,
    /// Member applications as stored. Empty on every load balancer handed
    /// out by the cache, which returns `applications` instead.
    #[serde(rename = "applicationIDs")]
    pub application_ids: Vec<AppId>,
    pub applications: Vec<Application>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Update fields whose zero value stands for "leave unchanged".
pub trait Sentinel {
    fn is_zero(&self) -> bool;
}

impl Sentinel for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

// Seconds from 0001-01-01T00:00:00Z, the zero time of portal clients, to the
// Unix epoch.
const ZERO_TIME_SECS: i64 = -62_135_596_800;

impl Sentinel for DateTime<Utc> {
    fn is_zero(&self) -> bool {
        self.timestamp() <= ZERO_TIME_SECS
    }
}

/// The value an update field asks for, or `None` when the field was omitted
/// or carries its zero value. A field therefore cannot be cleared through a
/// partial update.
pub fn requested<T: Sentinel>(field: &Option<T>) -> Option<&T> {
    field.as_ref().filter(|value| !value.is_zero())
}

/// Reads an empty string as an omitted field, for enums whose zero value
/// has no variant.
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) if !value.is_empty() => T::deserialize(value.into_deserializer()).map(Some),
        _ => Ok(None),
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum UpdateError {
    #[error("remove cannot be combined with field changes")]
    RemoveWithChanges,
    #[error("no application IDs on input")]
    NoApplicationIds,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateApplication {
    pub name: Option<String>,
    #[serde(deserialize_with = "empty_as_none")]
    pub status: Option<AppStatus>,
    pub first_date_surpassed: Option<DateTime<Utc>>,
    pub gateway_settings: Option<GatewaySettings>,
    pub notification_settings: Option<NotificationSettings>,
    pub pay_plan_type: Option<PlanType>,
    pub remove: bool,
}

impl Application {
    /// Sentinel merge of every requested field except the pay plan, whose
    /// resolution differs between the store and the cache.
    pub fn merge(&mut self, update: &UpdateApplication) {
        if let Some(name) = requested(&update.name) {
            self.name = name.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(first_date_surpassed) = requested(&update.first_date_surpassed) {
            self.first_date_surpassed = Some(*first_date_surpassed);
        }
        // Nested settings are replaced wholesale, never merged per field
        if let Some(settings) = &update.gateway_settings {
            self.gateway_settings = Some(settings.clone());
        }
        if let Some(settings) = &update.notification_settings {
            self.notification_settings = Some(settings.clone());
        }
    }
}

impl LoadBalancer {
    pub fn merge(&mut self, update: &UpdateLoadBalancer) {
        if let Some(name) = requested(&update.name) {
            self.name = name.clone();
        }
        if let Some(options) = &update.sticky_options {
            self.sticky_options = Some(options.clone());
        }
    }
}

impl UpdateApplication {
    pub fn has_changes(&self) -> bool {
        requested(&self.name).is_some()
            || self.status.is_some()
            || requested(&self.first_date_surpassed).is_some()
            || self.gateway_settings.is_some()
            || self.notification_settings.is_some()
            || requested(&self.pay_plan_type).is_some()
    }

    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.remove && self.has_changes() {
            return Err(UpdateError::RemoveWithChanges);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateLoadBalancer {
    pub name: Option<String>,
    #[serde(rename = "stickinessOptions")]
    pub sticky_options: Option<StickinessOptions>,
    pub remove: bool,
}

impl UpdateLoadBalancer {
    pub fn has_changes(&self) -> bool {
        requested(&self.name).is_some() || self.sticky_options.is_some()
    }

    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.remove && self.has_changes() {
            return Err(UpdateError::RemoveWithChanges);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFirstDateSurpassed {
    #[serde(rename = "applicationIDs")]
    pub application_ids: Vec<AppId>,
    pub first_date_surpassed: DateTime<Utc>,
}

impl UpdateFirstDateSurpassed {
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.application_ids.is_empty() {
            return Err(UpdateError::NoApplicationIds);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_ignores_zero_values() {
        assert_eq!(requested::<String>(&None), None);
        assert_eq!(requested(&Some(String::new())), None);
        assert_eq!(requested(&Some("app".to_string())), Some(&"app".to_string()));
    }

    #[test]
    fn test_remove_is_exclusive() {
        let update = UpdateApplication {
            remove: true,
            ..Default::default()
        };
        assert_eq!(update.validate(), Ok(()));

        // An empty name is not a change, so it does not conflict with remove
        let update = UpdateApplication {
            name: Some(String::new()),
            remove: true,
            ..Default::default()
        };
        assert_eq!(update.validate(), Ok(()));

        let update = UpdateApplication {
            status: Some(AppStatus::Ready),
            remove: true,
            ..Default::default()
        };
        assert_eq!(update.validate(), Err(UpdateError::RemoveWithChanges));

        let update = UpdateLoadBalancer {
            sticky_options: Some(StickinessOptions::default()),
            remove: true,
            ..Default::default()
        };
        assert_eq!(update.validate(), Err(UpdateError::RemoveWithChanges));
    }

    #[test]
    fn test_update_from_json() {
        let update: UpdateApplication = serde_json::from_str(
            r#"{"name": "renamed", "payPlanType": "TEST_PLAN_10K", "status": "ready"}"#,
        )
        .unwrap();
        assert_eq!(update.name.as_deref(), Some("renamed"));
        assert_eq!(update.pay_plan_type.as_deref(), Some("TEST_PLAN_10K"));
        assert_eq!(update.status, Some(AppStatus::Ready));
        assert!(update.gateway_settings.is_none());
        assert!(!update.remove);
    }

    #[test]
    fn test_zero_values_from_json() {
        let update: UpdateApplication = serde_json::from_str(
            r#"{"name": "renamed", "status": "", "firstDateSurpassed": "0001-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(update.status, None);
        assert!(update.first_date_surpassed.is_some());
        assert_eq!(requested(&update.first_date_surpassed), None);

        let update: UpdateApplication = serde_json::from_str(
            r#"{"firstDateSurpassed": "0001-01-01T00:00:00Z", "remove": true}"#,
        )
        .unwrap();
        assert!(!update.has_changes());
        assert_eq!(update.validate(), Ok(()));

        assert!(serde_json::from_str::<UpdateApplication>(r#"{"status": "bogus"}"#).is_err());
    }

    #[test]
    fn test_merge_skips_zero_time() {
        let first = DateTime::parse_from_rfc3339("2022-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut app = Application {
            first_date_surpassed: Some(first),
            ..Default::default()
        };
        let update: UpdateApplication =
            serde_json::from_str(r#"{"firstDateSurpassed": "0001-01-01T00:00:00Z"}"#).unwrap();
        app.merge(&update);
        assert_eq!(app.first_date_surpassed, Some(first));
    }

    #[test]
    fn test_renamed_fields() {
        let lb = LoadBalancer {
            sticky_options: Some(StickinessOptions::default()),
            ..Default::default()
        };
        let value = serde_json::to_value(&lb).unwrap();
        assert!(value.get("stickinessOptions").is_some());

        let redirect: Redirect =
            serde_json::from_str(r#"{"blockchainID": "0021", "loadBalancerID": "lb1"}"#).unwrap();
        assert_eq!(redirect.load_balancer_id, "lb1");
        assert_eq!(serde_json::to_value(&redirect).unwrap()["loadbalancer"], "lb1");
    }

    #[test]
    fn test_first_date_requires_ids() {
        let update: UpdateFirstDateSurpassed = serde_json::from_str(
            r#"{"applicationIDs": [], "firstDateSurpassed": "2022-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(update.validate(), Err(UpdateError::NoApplicationIds));
    }
}
