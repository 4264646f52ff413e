use crate::store::Dataset;
use crate::types::{
    AppStatus, Application, Blockchain, GatewayAat, LoadBalancer, NotificationSettings, PayPlan,
    Redirect,
};

/// An application as the store returns it, before the cache joins its plan.
pub fn stored_application(id: &str, user_id: &str) -> Application {
    Application {
        id: id.into(),
        user_id: user_id.into(),
        name: format!("{id}-name"),
        status: AppStatus::InService,
        gateway_aat: GatewayAat {
            application_public_key: format!("{id}-pub"),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn dataset() -> Dataset {
    let mut app1 = stored_application("app1", "user1");
    app1.name = "wallet".into();
    app1.pay_plan_type = Some("FREETIER_V0".into());
    app1.gateway_aat.application_public_key = "pub1".into();

    let mut app2 = stored_application("app2", "user1");
    app2.pay_plan_type = Some("TEST_PLAN_10K".into());
    app2.notification_settings = Some(NotificationSettings {
        signed_up: true,
        quarter: true,
        half: true,
        three_quarters: true,
        full: true,
    });

    let app3 = stored_application("app3", "user3");

    Dataset {
        pay_plans: vec![
            PayPlan::new("FREETIER_V0", 250_000),
            PayPlan::new("TEST_PLAN_10K", 10_000),
        ],
        blockchains: vec![Blockchain {
            id: "0021".into(),
            blockchain: "eth-mainnet".into(),
            ticker: "ETH".into(),
            active: true,
            ..Default::default()
        }],
        redirects: vec![Redirect {
            blockchain_id: "0021".into(),
            alias: "eth-mainnet".into(),
            load_balancer_id: "lb1".into(),
            domain: "eth.example".into(),
            ..Default::default()
        }],
        applications: vec![app1, app2, app3],
        load_balancers: vec![LoadBalancer {
            id: "lb1".into(),
            user_id: "user1".into(),
            name: "wallet-lb".into(),
            request_timeout: 5_000,
            application_ids: vec!["app1".into(), "app2".into()],
            ..Default::default()
        }],
    }
}
