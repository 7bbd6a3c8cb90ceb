//! Template and submission visibility across the independent access paths.

mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use common::{bearer, get_request, signed_context, TestApp, GLOBAL_PARTNERSHIP_ID};
use invitation_service::middleware::access_context::{
    ACCESS_CONTEXT_HEADER, ACCESS_CONTEXT_SIGNATURE_HEADER,
};
use invitation_service::models::{Submission, Template, User};
use std::collections::BTreeSet;

struct Catalog {
    app: TestApp,
    own: Template,
    shared: Template,
    partner: Template,
    global: Template,
    foreign: Template,
}

fn catalog() -> Catalog {
    let app = TestApp::spawn();
    let own = Template::new("own", Some(1), None);
    let shared = Template::new("shared", Some(2), None).shared_with([1]);
    let partner = Template::new("partner", Some(3), Some(40));
    let global = Template::new("global", Some(4), Some(GLOBAL_PARTNERSHIP_ID));
    let foreign = Template::new("foreign", Some(5), Some(41));
    for t in [&own, &shared, &partner, &global, &foreign] {
        app.db.insert_template(t.clone()).unwrap();
    }
    Catalog {
        app,
        own,
        shared,
        partner,
        global,
        foreign,
    }
}

fn names(body: &serde_json::Value) -> BTreeSet<String> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn with_context(uri: &str, auth: Option<&str>, payload: &str, signature: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .header(ACCESS_CONTEXT_HEADER, payload)
        .header(ACCESS_CONTEXT_SIGNATURE_HEADER, signature);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn account_member_sees_own_shared_and_global() {
    let c = catalog();
    let member = c.app.seed_user("member@example.com", Some(1));

    let response = c
        .app
        .send(get_request("/templates", Some(&bearer(&member))))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(names(&response.json()), set(&["own", "shared", "global"]));
}

#[tokio::test]
async fn stored_partnership_grants_read() {
    let c = catalog();
    let partner = User::new("partner@example.com", None).with_partnerships([40]);
    c.app.db.insert_user(partner.clone()).unwrap();

    let body = c
        .app
        .send(get_request("/templates", Some(&bearer(&partner))))
        .await
        .json();
    assert_eq!(names(&body), set(&["partner", "global"]));
}

#[tokio::test]
async fn request_context_alone_is_enough() {
    let c = catalog();
    let (payload, signature) =
        signed_context(r#"{"accessible_partnership_ids":[41],"external_account_id":2}"#);

    let response = c
        .app
        .send(with_context("/templates", None, &payload, &signature))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(names(&response.json()), set(&["foreign", "shared", "global"]));
}

#[tokio::test]
async fn access_paths_compose_with_or() {
    let c = catalog();
    let member = c.app.seed_user("member@example.com", Some(1));
    let (payload, signature) = signed_context(r#"{"accessible_partnership_ids":[40]}"#);

    let body = c
        .app
        .send(with_context(
            "/templates",
            Some(&bearer(&member)),
            &payload,
            &signature,
        ))
        .await
        .json();
    assert_eq!(names(&body), set(&["own", "shared", "partner", "global"]));

    // Dropping the gateway context removes only what it alone granted.
    let body = c
        .app
        .send(get_request("/templates", Some(&bearer(&member))))
        .await
        .json();
    assert_eq!(names(&body), set(&["own", "shared", "global"]));
}

#[tokio::test]
async fn forged_or_unsigned_context_is_rejected() {
    let c = catalog();
    let payload = r#"{"accessible_partnership_ids":[41]}"#;

    let forged = c
        .app
        .send(with_context("/templates", None, payload, &"0".repeat(64)))
        .await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);

    let anonymous = c.app.send(get_request("/templates", None)).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn single_template_outside_scope_is_not_found() {
    let c = catalog();
    let member = c.app.seed_user("member@example.com", Some(1));
    let auth = bearer(&member);

    let own = c
        .app
        .send(get_request(&format!("/templates/{}", c.own.id), Some(&auth)))
        .await;
    assert_eq!(own.status, StatusCode::OK);
    assert_eq!(own.json()["name"], "own");

    for hidden in [&c.partner, &c.foreign] {
        let response = c
            .app
            .send(get_request(&format!("/templates/{}", hidden.id), Some(&auth)))
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    let global = c
        .app
        .send(get_request(&format!("/templates/{}", c.global.id), Some(&auth)))
        .await;
    assert_eq!(global.status, StatusCode::OK);
    let shared = c
        .app
        .send(get_request(&format!("/templates/{}", c.shared.id), Some(&auth)))
        .await;
    assert_eq!(shared.status, StatusCode::OK);
}

#[tokio::test]
async fn submissions_follow_ownership_or_template_access() {
    let c = catalog();
    let member = c.app.seed_user("member@example.com", Some(1));
    let auth = bearer(&member);

    let owned = Submission::new(c.foreign.id, Some(1));
    let via_template = Submission::new(c.own.id, Some(7));
    let hidden = Submission::new(c.foreign.id, Some(7));
    for s in [&owned, &via_template, &hidden] {
        c.app.db.insert_submission(s.clone()).unwrap();
    }

    for (submission, expected) in [
        (&owned, StatusCode::OK),
        (&via_template, StatusCode::OK),
        (&hidden, StatusCode::NOT_FOUND),
    ] {
        let response = c
            .app
            .send(get_request(
                &format!("/submissions/{}", submission.id),
                Some(&auth),
            ))
            .await;
        assert_eq!(response.status, expected);
    }

    let missing = c
        .app
        .send(get_request(
            &format!("/submissions/{}", uuid::Uuid::new_v4()),
            Some(&auth),
        ))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}
