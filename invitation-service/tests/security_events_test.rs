//! Audit log query, export and alert endpoints.

mod common;

use axum::http::StatusCode;
use common::{bearer, get_request, json_request, TestApp};
use invitation_service::models::{Institution, SecurityEventType, User};
use serde_json::json;

struct Tenants {
    app: TestApp,
    north_admin: User,
    south_admin: User,
    north: Institution,
    south: Institution,
}

fn tenants() -> Tenants {
    let app = TestApp::spawn();
    let north_admin = app.seed_user("north@example.com", Some(1));
    let south_admin = app.seed_user("south@example.com", Some(2));
    let north = app.seed_institution("Northfield", &north_admin);
    let south = app.seed_institution("Southgate", &south_admin);
    Tenants {
        app,
        north_admin,
        south_admin,
        north,
        south,
    }
}

async fn invite(app: &TestApp, admin: &User, institution: &Institution, email: &str) {
    let response = app
        .send(json_request(
            "POST",
            "/invitations",
            Some(&bearer(admin)),
            json!({
                "institution_id": institution.id,
                "email": email,
                "role": "cohort_admin",
            }),
        ))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn non_admin_is_forbidden_and_logged() {
    let t = tenants();
    let nobody = t.app.seed_user("nobody@example.com", None);

    for path in [
        "/security_events",
        "/security_events/export",
        "/security_events/alerts",
    ] {
        let response = t.app.send(get_request(path, Some(&bearer(&nobody)))).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN, "{}", path);
        assert_eq!(response.json()["error"], "Access denied");
    }

    let denied: Vec<_> = t
        .app
        .events()
        .into_iter()
        .filter(|e| e.event_type == SecurityEventType::InsufficientPrivileges)
        .collect();
    assert_eq!(denied.len(), 3);
    assert!(denied.iter().all(|e| e.user_id == Some(nobody.id)));
    assert_eq!(denied[0].ip_address.as_deref(), Some("203.0.113.10"));
}

#[tokio::test]
async fn admins_only_see_their_institutions() {
    let t = tenants();
    invite(&t.app, &t.north_admin, &t.north, "a@example.com").await;
    invite(&t.app, &t.north_admin, &t.north, "b@example.com").await;
    invite(&t.app, &t.south_admin, &t.south, "c@example.com").await;

    let response = t
        .app
        .send(get_request("/security_events", Some(&bearer(&t.north_admin))))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let page = response.json();
    assert_eq!(page["total"], 2);
    assert_eq!(page["limit"], 100);
    assert!(page["events"]
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["details"]["institution_id"] == t.north.id.to_string()));

    let south = t
        .app
        .send(get_request(
            "/security_events?event_type=invitation_created&limit=5000",
            Some(&bearer(&t.south_admin)),
        ))
        .await
        .json();
    assert_eq!(south["total"], 1);
    assert_eq!(south["limit"], 1000);
}

#[tokio::test]
async fn filters_by_user_and_type() {
    let t = tenants();
    invite(&t.app, &t.north_admin, &t.north, "a@example.com").await;

    // An outsider trying Northfield is visible to its admin.
    let outsider = t.app.seed_user("eve@example.com", None);
    t.app
        .send(json_request(
            "POST",
            "/invitations",
            Some(&bearer(&outsider)),
            json!({
                "institution_id": t.north.id,
                "email": "x@example.com",
                "role": "cohort_admin",
            }),
        ))
        .await;

    let attempts = t
        .app
        .send(get_request(
            &format!(
                "/security_events?user_id={}&event_type=unauthorized_institution_access",
                outsider.id
            ),
            Some(&bearer(&t.north_admin)),
        ))
        .await
        .json();
    assert_eq!(attempts["total"], 1);
    assert_eq!(attempts["events"][0]["user_id"], outsider.id.to_string());

    let bad_offset = t
        .app
        .send(get_request(
            "/security_events?offset=-3",
            Some(&bearer(&t.north_admin)),
        ))
        .await;
    assert_eq!(bad_offset.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn export_streams_csv_and_is_audited() {
    let t = tenants();
    invite(&t.app, &t.north_admin, &t.north, "a@example.com").await;
    invite(&t.app, &t.north_admin, &t.north, "b@example.com").await;
    invite(&t.app, &t.south_admin, &t.south, "c@example.com").await;

    let response = t
        .app
        .send(get_request(
            "/security_events/export?event_type=invitation_created",
            Some(&bearer(&t.north_admin)),
        ))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(response.headers["content-disposition"]
        .to_str()
        .unwrap()
        .contains("security_events_"));

    let mut lines = response.text.lines();
    assert_eq!(
        lines.next(),
        Some("id,created_at,event_type,user_id,ip_address,details")
    );
    let rows: Vec<_> = lines.collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.contains("invitation_created")));
    assert!(rows.iter().all(|r| r.contains(&t.north.id.to_string())));

    let exported = t
        .app
        .events()
        .into_iter()
        .find(|e| e.event_type == SecurityEventType::SecurityEventsExported)
        .expect("export is audited");
    assert_eq!(exported.user_id, Some(t.north_admin.id));
    assert_eq!(exported.details["filter"]["event_type"], "invitation_created");
}

#[tokio::test]
async fn alerts_flag_repeated_access_attempts() {
    let t = tenants();
    let outsider = t.app.seed_user("eve@example.com", None);

    for _ in 0..5 {
        let response = t
            .app
            .send(json_request(
                "POST",
                "/invitations",
                Some(&bearer(&outsider)),
                json!({
                    "institution_id": t.north.id,
                    "email": "x@example.com",
                    "role": "cohort_admin",
                }),
            ))
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    let north = t
        .app
        .send(get_request(
            "/security_events/alerts",
            Some(&bearer(&t.north_admin)),
        ))
        .await;
    assert_eq!(north.status, StatusCode::OK);
    let north = north.json();
    let alerts = north["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["event_type"], "unauthorized_institution_access");
    assert_eq!(alerts[0]["count"], 5);
    assert_eq!(alerts[0]["threshold"], 5);

    // Southgate's admin cannot see Northfield's access attempts.
    let south = t
        .app
        .send(get_request(
            "/security_events/alerts",
            Some(&bearer(&t.south_admin)),
        ))
        .await
        .json();
    assert!(south["alerts"].as_array().unwrap().is_empty());
}

async fn accept(app: &TestApp, user: &User, token: &str) -> StatusCode {
    app.send(json_request(
        "POST",
        "/invitation_acceptance",
        Some(&bearer(user)),
        json!({ "token": token, "email": user.email }),
    ))
    .await
    .status
}

#[tokio::test]
async fn replayed_token_raises_alert_for_its_institution() {
    let t = tenants();
    let invitee = t.app.seed_user("bob@example.com", None);
    invite(&t.app, &t.north_admin, &t.north, "bob@example.com").await;
    let invitation_id = t.app.invitations()[0].id.to_string();
    let raw = t.app.raw_token_for(&invitation_id);

    assert_eq!(accept(&t.app, &invitee, &raw).await, StatusCode::OK);
    for _ in 0..20 {
        assert_eq!(
            accept(&t.app, &invitee, &raw).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    let north = t
        .app
        .send(get_request(
            "/security_events/alerts",
            Some(&bearer(&t.north_admin)),
        ))
        .await
        .json();
    let alerts = north["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["event_type"], "token_validation_failure");
    assert_eq!(alerts[0]["count"], 20);
    assert_eq!(alerts[0]["threshold"], 20);

    // The failures belong to Northfield, so Southgate's summary stays quiet.
    let south = t
        .app
        .send(get_request(
            "/security_events/alerts",
            Some(&bearer(&t.south_admin)),
        ))
        .await
        .json();
    assert!(south["alerts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unmatched_token_failures_count_for_every_admin() {
    let t = tenants();
    let guesser = t.app.seed_user("guesser@example.com", None);

    for i in 0..20 {
        let token = format!("guessed-token-{:04}", i);
        assert_eq!(
            accept(&t.app, &guesser, &token).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    for admin in [&t.north_admin, &t.south_admin] {
        let summary = t
            .app
            .send(get_request("/security_events/alerts", Some(&bearer(admin))))
            .await
            .json();
        let alerts = summary["alerts"].as_array().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["event_type"], "token_validation_failure");
        assert_eq!(alerts[0]["count"], 20);
    }

    // The event list itself stays scoped to the admin's institutions.
    let listed = t
        .app
        .send(get_request(
            "/security_events?event_type=token_validation_failure",
            Some(&bearer(&t.north_admin)),
        ))
        .await
        .json();
    assert_eq!(listed["total"], 0);
}
