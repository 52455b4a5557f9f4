//! Stories about BucketAccessRequest granting and revocation on a live cluster

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};

use cosi_controller::crd::{
    BucketAccess, BucketAccessClass, BucketAccessClassSpec, BucketAccessRequest,
    BucketAccessRequestSpec, BucketClaim, BucketClaimSpec, BucketClass, BucketClassSpec,
    NamespacedReference,
};

use super::helpers::{
    create_namespace, delete_namespace, ensure_test_cluster, spawn_controllers, wait_for,
    CONVERGE_TIMEOUT,
};

// =============================================================================
// Test Fixtures
// =============================================================================

async fn create_classes(client: &Client, namespace: &str) {
    let classes: Api<BucketClass> = Api::all(client.clone());
    let _ = classes.delete("it-access-gold", &DeleteParams::default()).await;
    classes
        .create(
            &PostParams::default(),
            &BucketClass::new(
                "it-access-gold",
                BucketClassSpec {
                    driver_name: "sample.cosi.driver".to_string(),
                    ..Default::default()
                },
            ),
        )
        .await
        .expect("failed to create BucketClass");

    let access_classes: Api<BucketAccessClass> = Api::all(client.clone());
    let _ = access_classes
        .delete("it-access-class", &DeleteParams::default())
        .await;
    access_classes
        .create(
            &PostParams::default(),
            &BucketAccessClass::new(
                "it-access-class",
                BucketAccessClassSpec {
                    driver_name: "sample.cosi.driver".to_string(),
                    parameters: BTreeMap::new(),
                    policy_actions_config_map: Some(NamespacedReference {
                        name: "policy".to_string(),
                        namespace: namespace.to_string(),
                    }),
                },
            ),
        )
        .await
        .expect("failed to create BucketAccessClass");

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let policy = ConfigMap {
        metadata: ObjectMeta {
            name: Some("policy".to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "read".to_string(),
            "s3:GetObject".to_string(),
        )])),
        ..Default::default()
    };
    let _ = config_maps.create(&PostParams::default(), &policy).await;
}

async fn create_request(client: &Client, namespace: &str) -> BucketAccessRequest {
    let api: Api<BucketAccessRequest> = Api::namespaced(client.clone(), namespace);
    let request = BucketAccessRequest::new(
        "bucketaccess1",
        BucketAccessRequestSpec {
            bucket_claim_name: "bucketclaim1".to_string(),
            bucket_access_class_name: "it-access-class".to_string(),
            service_account_name: None,
        },
    );
    api.create(&PostParams::default(), &request)
        .await
        .expect("failed to create BucketAccessRequest")
}

async fn create_claim(client: &Client, namespace: &str) {
    let api: Api<BucketClaim> = Api::namespaced(client.clone(), namespace);
    let claim = BucketClaim::new(
        "bucketclaim1",
        BucketClaimSpec {
            bucket_class_name: "it-access-gold".to_string(),
            ..Default::default()
        },
    );
    api.create(&PostParams::default(), &claim)
        .await
        .expect("failed to create BucketClaim");
}

// =============================================================================
// Stories
// =============================================================================

/// Story: A team asks for credentials before its bucket exists
///
/// Expected behavior:
/// - Nothing is granted while the claim is missing or unbound
/// - Once the claim is bound, a BucketAccess named `{accessClass}-{uid}` is
///   created with the policy ConfigMap data serialized as JSON
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_access_waits_for_claim_then_is_granted() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let ns = "cosi-access-grant";
    create_namespace(&client, ns).await;
    create_classes(&client, ns).await;
    let controllers = spawn_controllers(client.clone());

    let request = create_request(&client, ns).await;
    let uid = request.uid().expect("request has uid");
    let expected = format!("it-access-class-{uid}");

    let accesses: Api<BucketAccess> = Api::all(client.clone());
    assert!(accesses.get_opt(&expected).await.unwrap().is_none());

    create_claim(&client, ns).await;

    let requests: Api<BucketAccessRequest> = Api::namespaced(client.clone(), ns);
    let granted = wait_for(CONVERGE_TIMEOUT, || {
        let requests = requests.clone();
        async move {
            requests
                .get_opt("bucketaccess1")
                .await
                .ok()
                .flatten()
                .filter(|r| r.bound_access().is_some())
        }
    })
    .await
    .expect("access was not granted in time");
    assert_eq!(granted.bound_access(), Some(expected.as_str()));

    let access = accesses.get(&expected).await.expect("access exists");
    assert!(access.is_bound_to(&uid));
    assert_eq!(
        access.spec.policy_actions_config_map_data,
        r#"{"read":"s3:GetObject"}"#
    );

    requests
        .delete("bucketaccess1", &DeleteParams::default())
        .await
        .expect("failed to delete request");
    let revoked = wait_for(CONVERGE_TIMEOUT, || {
        let (accesses, expected) = (accesses.clone(), expected.clone());
        async move { accesses.get_opt(&expected).await.ok()?.is_none().then_some(()) }
    })
    .await;
    assert!(revoked.is_some(), "access should be revoked");

    controllers.abort();
    delete_namespace(&client, ns).await;
}
