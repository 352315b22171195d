//! Get/create/update/delete against a mock directory backend.

mod common;

use common::*;
use dirsync_client::{
    AddressBy, DirectoryConfig, RelationConfig, ResourceConfig, SyncOrchestrator, TenantConfig,
    UpdateMethod, UpdateRequest,
};
use dirsync_connector::prelude::*;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn attributes(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

/// A resource addressed by distinguished name, with a path-valued `manager`.
fn people_tenant(server: &MockServer) -> TenantConfig {
    TenantConfig::new([server.uri()])
        .with_auth(test_auth())
        .with_directory(DirectoryConfig::default())
        .with_resource(
            "users",
            ResourceConfig::new("/users")
                .with_id_attribute("objectGUID")
                .with_address_by(AddressBy::MutablePath)
                .with_path_valued_attribute("manager")
                .with_mapping("userName", "sAMAccountName"),
        )
}

async fn mount_directory_entry(server: &MockServer, guid: &str, dn: &str) {
    let entry = json!({"value": [{"objectGUID": guid, "distinguishedName": dn}]});

    Mock::given(method("GET"))
        .and(path("/directoryObjects"))
        .and(query_param("filter", format!("objectGUID eq \"{guid}\"").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(entry.clone()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/directoryObjects"))
        .and(query_param("filter", format!("distinguishedName eq \"{dn}\"").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(entry))
        .mount(server)
        .await;
}

/// Tests that create maps canonical names outbound and the response inbound.
#[tokio::test]
async fn test_create_maps_attributes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_json(json!({
            "userPrincipalName": "ada@contoso.example",
            "displayName": "Ada Lovelace"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "new-1",
            "userPrincipalName": "ada@contoso.example",
            "displayName": "Ada Lovelace"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(tenant_config(&[server.uri()]));
    let created = orchestrator
        .create(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            &attributes(json!({"userName": "ada@contoso.example", "displayName": "Ada Lovelace"})),
        )
        .await
        .unwrap();

    assert_eq!(created["id"], "new-1");
    assert_eq!(created["userName"], "ada@contoso.example");
    assert!(created.get("userPrincipalName").is_none());
}

/// Tests that a duplicate create is reported as a conflict.
#[tokio::test]
async fn test_create_duplicate_is_conflict() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(409).set_body_json(create_odata_error(
            "Request_BadRequest",
            "Another object with the same value for property userPrincipalName already exists.",
        )))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(tenant_config(&[server.uri()]));
    let err = orchestrator
        .create(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            &attributes(json!({"userName": "ada@contoso.example"})),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    let reported = SyncOrchestrator::protocol_error(&err);
    assert_eq!(reported.status, 409);
    assert!(reported.detail.contains("already exists"));
}

/// Tests that relations are read separately and a missing relation is null.
#[tokio::test]
async fn test_get_with_relations() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_test_user("1", "ada")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/1/manager"))
        .respond_with(ResponseTemplate::new(404).set_body_json(create_odata_error(
            "Request_ResourceNotFound",
            "Resource 'manager' does not exist",
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/1/sponsor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "s-9"})))
        .mount(&server)
        .await;

    let tenant = TenantConfig::new([server.uri()])
        .with_auth(test_auth())
        .with_resource(
            "users",
            users_resource()
                .with_relation(RelationConfig::new("manager", "/users/{id}/manager"))
                .with_relation(RelationConfig::new("sponsor", "/users/{id}/sponsor")),
        );
    let orchestrator = orchestrator(tenant);

    let user = orchestrator
        .get(&TenantKey::new(TENANT), &ResourceType::users(), "1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(user["id"], "1");
    assert_eq!(user["userName"], "ada@contoso.example");
    assert!(user["manager"].is_null());
    assert_eq!(user["sponsor"], "s-9");
}

/// Tests that reading a missing object is `None`, not an error.
#[tokio::test]
async fn test_get_missing_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(tenant_config(&[server.uri()]));
    let user = orchestrator
        .get(&TenantKey::new(TENANT), &ResourceType::users(), "404")
        .await
        .unwrap();
    assert!(user.is_none());
}

/// Tests that a PATCH without a body is followed by a read.
#[tokio::test]
async fn test_update_patch_then_get() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/users/1"))
        .and(body_json(json!({"accountEnabled": false})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1",
            "userPrincipalName": "ada@contoso.example",
            "accountEnabled": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(tenant_config(&[server.uri()]));
    let updated = orchestrator
        .update(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            "1",
            &UpdateRequest::new(attributes(json!({"accountEnabled": false}))),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated["accountEnabled"], false);
}

/// Tests that a PUT returning the object skips the read-back.
#[tokio::test]
async fn test_update_put_returns_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1",
            "userPrincipalName": "grace@contoso.example"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tenant = TenantConfig::new([server.uri()])
        .with_auth(test_auth())
        .with_resource("users", users_resource().with_update_method(UpdateMethod::Put));
    let orchestrator = orchestrator(tenant);

    let updated = orchestrator
        .update(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            "1",
            &UpdateRequest::new(attributes(json!({"userName": "grace@contoso.example"}))),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated["userName"], "grace@contoso.example");
}

/// Tests that updating a missing object is `None`.
#[tokio::test]
async fn test_update_missing_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/users/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(tenant_config(&[server.uri()]));
    let updated = orchestrator
        .update(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            "gone",
            &UpdateRequest::new(attributes(json!({"displayName": "x"}))),
        )
        .await
        .unwrap();
    assert!(updated.is_none());
}

/// Tests delete, and that deleting a missing object is not-found.
#[tokio::test]
async fn test_delete() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/users/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(tenant_config(&[server.uri()]));
    let tenant = TenantKey::new(TENANT);

    orchestrator
        .delete(&tenant, &ResourceType::users(), "1")
        .await
        .unwrap();

    let err = orchestrator
        .delete(&tenant, &ResourceType::users(), "2")
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::NotFound { ref identifier } if identifier == "2"));
    assert_eq!(SyncOrchestrator::protocol_error(&err).status, 404);
}

/// Tests that a mutable-path backend is addressed by the resolved, encoded path
/// and that path-valued attributes come back as stable ids.
#[tokio::test]
async fn test_get_by_mutable_path() {
    let server = MockServer::start().await;
    mount_directory_entry(&server, "guid-ada", "CN=Ada,OU=Staff").await;
    mount_directory_entry(&server, "guid-grace", "CN=Grace,OU=Staff").await;

    Mock::given(method("GET"))
        .and(path("/users/CN%3DAda%2COU%3DStaff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objectGUID": "guid-ada",
            "distinguishedName": "CN=Ada,OU=Staff",
            "sAMAccountName": "ada",
            "manager": "CN=Grace,OU=Staff"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(people_tenant(&server));
    let user = orchestrator
        .get(&TenantKey::new(TENANT), &ResourceType::users(), "guid-ada")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(user["id"], "guid-ada");
    assert_eq!(user["userName"], "ada");
    assert_eq!(user["manager"], "guid-grace");
}

/// Tests that path-valued attributes are sent as paths on create.
#[tokio::test]
async fn test_create_translates_path_valued_attributes() {
    let server = MockServer::start().await;
    mount_directory_entry(&server, "guid-grace", "CN=Grace,OU=Staff").await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_json(json!({
            "sAMAccountName": "ada",
            "manager": "CN=Grace,OU=Staff"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "objectGUID": "guid-ada",
            "sAMAccountName": "ada",
            "manager": "CN=Grace,OU=Staff"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(people_tenant(&server));
    let created = orchestrator
        .create(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            &attributes(json!({"userName": "ada", "manager": "guid-grace"})),
        )
        .await
        .unwrap();

    assert_eq!(created["id"], "guid-ada");
    assert_eq!(created["manager"], "guid-grace");
}

/// Tests that an unresolvable stable id reads as absent and deletes as not-found.
#[tokio::test]
async fn test_unresolvable_stable_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/directoryObjects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(people_tenant(&server));
    let tenant = TenantKey::new(TENANT);

    let user = orchestrator
        .get(&tenant, &ResourceType::users(), "guid-nobody")
        .await
        .unwrap();
    assert!(user.is_none());

    let err = orchestrator
        .delete(&tenant, &ResourceType::users(), "guid-nobody")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Tests that an ambiguous lookup is an error, never a guess.
#[tokio::test]
async fn test_ambiguous_lookup() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/directoryObjects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"objectGUID": "guid-dup", "distinguishedName": "CN=Ada,OU=Staff"},
                {"objectGUID": "guid-dup", "distinguishedName": "CN=Ada,OU=Alumni"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/CN%3DAda%2COU%3DStaff"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(people_tenant(&server));
    let err = orchestrator
        .get(&TenantKey::new(TENANT), &ResourceType::users(), "guid-dup")
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectorError::Ambiguous { matches: 2, .. }));
    assert_eq!(SyncOrchestrator::protocol_error(&err).status, 409);
}

async fn mount_empty_directory(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/directoryObjects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .with_priority(10)
        .mount(server)
        .await;
}

/// Tests that a reference to a deleted directory object reads as null.
#[tokio::test]
async fn test_get_with_dangling_reference() {
    let server = MockServer::start().await;
    mount_directory_entry(&server, "guid-ada", "CN=Ada,OU=Staff").await;
    mount_empty_directory(&server).await;

    Mock::given(method("GET"))
        .and(path("/users/CN%3DAda%2COU%3DStaff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objectGUID": "guid-ada",
            "sAMAccountName": "ada",
            "manager": "CN=Deleted,OU=Staff"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(people_tenant(&server));
    let user = orchestrator
        .get(&TenantKey::new(TENANT), &ResourceType::users(), "guid-ada")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(user["id"], "guid-ada");
    assert!(user["manager"].is_null());
}

/// Tests that one dangling reference does not fail the whole page.
#[tokio::test]
async fn test_enumerate_with_dangling_reference() {
    let server = MockServer::start().await;
    mount_directory_entry(&server, "guid-grace", "CN=Grace,OU=Staff").await;
    mount_empty_directory(&server).await;

    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"objectGUID": "guid-ada", "sAMAccountName": "ada", "manager": "CN=Deleted,OU=Staff"},
                {
                    "objectGUID": "guid-alan",
                    "sAMAccountName": "alan",
                    "manager": ["CN=Grace,OU=Staff", "CN=Deleted,OU=Staff"]
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(people_tenant(&server));
    let page = orchestrator
        .enumerate(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            PageRequest::new(1, 100),
        )
        .await
        .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page.total_results, 2);
    assert!(page.resources[0]["manager"].is_null());
    assert_eq!(page.resources[1]["manager"], json!(["guid-grace"]));
}

/// Tests that writing a reference to an unknown object is rejected before any write.
#[tokio::test]
async fn test_create_with_unknown_reference() {
    let server = MockServer::start().await;
    mount_empty_directory(&server).await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(people_tenant(&server));
    let err = orchestrator
        .create(
            &TenantKey::new(TENANT),
            &ResourceType::users(),
            &attributes(json!({"userName": "ada", "manager": "guid-unknown"})),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectorError::Validation { ref message } if message.contains("manager")));
    assert_eq!(SyncOrchestrator::protocol_error(&err).status, 400);
}
