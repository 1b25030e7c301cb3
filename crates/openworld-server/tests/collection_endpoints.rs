use serde_json::{json, Value};

#[path = "support/mod.rs"]
mod support;

use support::{
    error_code, error_message, get_json, register, send_empty, send_json, spawn_app, upload_image,
};

const MISSING_ID: &str = "00000000-0000-4000-8000-000000000000";

async fn create_collection(
    addr: std::net::SocketAddr,
    token: &str,
    title: &str,
    is_private: bool,
) -> Value {
    let (status, body) = send_json(
        addr,
        "POST",
        "/v1/collections",
        Some(token),
        &json!({"title": title, "is_private": is_private}),
    )
    .await;
    assert_eq!(status, 201, "create {title}: {body}");
    body
}

#[tokio::test]
async fn create_and_fetch_a_collection() {
    let server = spawn_app().await;
    let (token, user_id) = register(server.addr, "Lou", "lou@example.com").await;

    let (status, body) = send_json(
        server.addr,
        "POST",
        "/v1/collections",
        Some(&token),
        &json!({"title": "Road trips", "description": "Van life"}),
    )
    .await;
    assert_eq!(status, 201, "{body}");
    let id = body.get("id").and_then(Value::as_str).expect("collection id");
    assert_eq!(body.get("is_private").and_then(Value::as_bool), Some(false));
    assert_eq!(body.get("image_count").and_then(Value::as_u64), Some(0));
    assert_eq!(
        body.pointer("/owner/id").and_then(Value::as_str),
        Some(user_id.as_str())
    );

    // Public collections are readable without a session.
    let (status, detail) = get_json(server.addr, &format!("/v1/collections/{id}"), None).await;
    assert_eq!(status, 200, "{detail}");
    assert_eq!(
        detail.get("title").and_then(Value::as_str),
        Some("Road trips")
    );
    assert_eq!(
        detail.get("description").and_then(Value::as_str),
        Some("Van life")
    );
    assert_eq!(
        detail.get("images").and_then(Value::as_array).map(Vec::len),
        Some(0)
    );
}

#[tokio::test]
async fn create_requires_a_title() {
    let server = spawn_app().await;
    let (token, _) = register(server.addr, "Max", "max@example.com").await;
    let (status, body) = send_json(
        server.addr,
        "POST",
        "/v1/collections",
        Some(&token),
        &json!({"title": "  "}),
    )
    .await;
    assert_eq!(status, 400, "{body}");
    assert_eq!(
        body.pointer("/error/details/field_errors/0/field")
            .and_then(Value::as_str),
        Some("title")
    );
}

#[tokio::test]
async fn listing_defaults_to_self_and_hides_private_collections_of_others() {
    let server = spawn_app().await;
    let (lou, lou_id) = register(server.addr, "Lou", "lou@example.com").await;
    let (mae, _) = register(server.addr, "Mae", "mae@example.com").await;

    create_collection(server.addr, &lou, "Public walls", false).await;
    create_collection(server.addr, &lou, "Drafts", true).await;

    let (status, list) = get_json(server.addr, "/v1/collections", Some(&lou)).await;
    assert_eq!(status, 200, "{list}");
    assert_eq!(list.get("count").and_then(Value::as_u64), Some(2));

    let (status, list) =
        get_json(server.addr, &format!("/v1/collections?user={lou_id}"), Some(&mae)).await;
    assert_eq!(status, 200, "{list}");
    assert_eq!(list.get("count").and_then(Value::as_u64), Some(1));
    assert_eq!(
        list.pointer("/collections/0/title").and_then(Value::as_str),
        Some("Public walls")
    );

    let (status, list) = get_json(server.addr, "/v1/collections", Some(&mae)).await;
    assert_eq!(status, 200);
    assert_eq!(list.get("count").and_then(Value::as_u64), Some(0));

    let (status, _) = get_json(server.addr, "/v1/collections", None).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn private_collections_are_owner_only() {
    let server = spawn_app().await;
    let (owner, _) = register(server.addr, "Nan", "nan@example.com").await;
    let (other, _) = register(server.addr, "Oli", "oli@example.com").await;
    let collection = create_collection(server.addr, &owner, "Secret boards", true).await;
    let id = collection
        .get("id")
        .and_then(Value::as_str)
        .expect("collection id");

    let (status, detail) =
        get_json(server.addr, &format!("/v1/collections/{id}"), Some(&owner)).await;
    assert_eq!(status, 200, "{detail}");

    let (status, body) =
        get_json(server.addr, &format!("/v1/collections/{id}"), Some(&other)).await;
    assert_eq!(status, 403, "{body}");
    assert_eq!(error_message(&body), "this collection is private");

    let (status, _) = get_json(server.addr, &format!("/v1/collections/{id}"), None).await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn updates_and_deletes_are_owner_only() {
    let server = spawn_app().await;
    let (owner, _) = register(server.addr, "Pam", "pam@example.com").await;
    let (other, _) = register(server.addr, "Quin", "quin@example.com").await;
    let collection = create_collection(server.addr, &owner, "Before rename", false).await;
    let id = collection
        .get("id")
        .and_then(Value::as_str)
        .expect("collection id");

    let (status, updated) = send_json(
        server.addr,
        "PATCH",
        &format!("/v1/collections/{id}"),
        Some(&owner),
        &json!({"title": "After rename", "is_private": true}),
    )
    .await;
    assert_eq!(status, 200, "{updated}");
    assert_eq!(
        updated.get("title").and_then(Value::as_str),
        Some("After rename")
    );
    assert_eq!(updated.get("is_private").and_then(Value::as_bool), Some(true));

    let (status, body) = send_json(
        server.addr,
        "PATCH",
        &format!("/v1/collections/{id}"),
        Some(&other),
        &json!({"title": "Mine now"}),
    )
    .await;
    assert_eq!(status, 403, "{body}");
    assert_eq!(error_message(&body), "only the owner can modify a collection");

    let (status, _) = send_empty(
        server.addr,
        "DELETE",
        &format!("/v1/collections/{id}"),
        Some(&other),
    )
    .await;
    assert_eq!(status, 403);

    let (status, _) = send_empty(
        server.addr,
        "DELETE",
        &format!("/v1/collections/{id}"),
        Some(&owner),
    )
    .await;
    assert_eq!(status, 200);
    let (status, _) = get_json(server.addr, &format!("/v1/collections/{id}"), Some(&owner)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn images_can_be_added_and_removed() {
    let server = spawn_app().await;
    let (owner, _) = register(server.addr, "Rue", "rue@example.com").await;
    let (other, _) = register(server.addr, "Sid", "sid@example.com").await;
    let image = upload_image(server.addr, &owner, "Pinned shot", "wall").await;
    let image_id = image.get("id").and_then(Value::as_str).expect("image id");
    let media_url = image
        .get("media_url")
        .and_then(Value::as_str)
        .expect("media url");
    let collection = create_collection(server.addr, &owner, "Wall of fame", false).await;
    let id = collection
        .get("id")
        .and_then(Value::as_str)
        .expect("collection id");

    let (status, body) = send_json(
        server.addr,
        "POST",
        &format!("/v1/collections/{id}/images"),
        Some(&other),
        &json!({"image_id": image_id}),
    )
    .await;
    assert_eq!(status, 403, "{body}");

    let (status, detail) = send_json(
        server.addr,
        "POST",
        &format!("/v1/collections/{id}/images"),
        Some(&owner),
        &json!({"image_id": image_id}),
    )
    .await;
    assert_eq!(status, 200, "{detail}");
    assert_eq!(detail.get("image_count").and_then(Value::as_u64), Some(1));
    assert_eq!(
        detail.pointer("/images/0/id").and_then(Value::as_str),
        Some(image_id)
    );

    // The first image doubles as the cover in list views.
    let (_, list) = get_json(server.addr, "/v1/collections", Some(&owner)).await;
    assert_eq!(
        list.pointer("/collections/0/cover_url").and_then(Value::as_str),
        Some(media_url)
    );

    let (status, _) = send_empty(
        server.addr,
        "DELETE",
        &format!("/v1/collections/{id}/images/{image_id}"),
        Some(&owner),
    )
    .await;
    assert_eq!(status, 200);
    let (_, detail) = get_json(server.addr, &format!("/v1/collections/{id}"), Some(&owner)).await;
    assert_eq!(
        detail.get("images").and_then(Value::as_array).map(Vec::len),
        Some(0)
    );
}

#[tokio::test]
async fn adding_images_checks_duplicates_and_existence() {
    let server = spawn_app().await;
    let (owner, _) = register(server.addr, "Tia", "tia@example.com").await;
    let image = upload_image(server.addr, &owner, "Once only", "single").await;
    let image_id = image.get("id").and_then(Value::as_str).expect("image id");
    let collection = create_collection(server.addr, &owner, "Singles", false).await;
    let id = collection
        .get("id")
        .and_then(Value::as_str)
        .expect("collection id");

    let (status, _) = send_json(
        server.addr,
        "POST",
        &format!("/v1/collections/{id}/images"),
        Some(&owner),
        &json!({"image_id": image_id}),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = send_json(
        server.addr,
        "POST",
        &format!("/v1/collections/{id}/images"),
        Some(&owner),
        &json!({"image_id": image_id}),
    )
    .await;
    assert_eq!(status, 409, "{body}");
    assert_eq!(error_code(&body), "conflict");

    let (status, body) = send_json(
        server.addr,
        "POST",
        &format!("/v1/collections/{id}/images"),
        Some(&owner),
        &json!({"image_id": MISSING_ID}),
    )
    .await;
    assert_eq!(status, 404, "{body}");

    let (status, body) = send_json(
        server.addr,
        "POST",
        &format!("/v1/collections/{id}/images"),
        Some(&owner),
        &json!({"image_id": "not-a-uuid"}),
    )
    .await;
    assert_eq!(status, 400, "{body}");
}

#[tokio::test]
async fn deleting_a_collection_leaves_its_images_alone() {
    let server = spawn_app().await;
    let (owner, _) = register(server.addr, "Una", "una@example.com").await;
    let image = upload_image(server.addr, &owner, "Survivor", "keep").await;
    let image_id = image.get("id").and_then(Value::as_str).expect("image id");
    let collection = create_collection(server.addr, &owner, "Doomed", false).await;
    let id = collection
        .get("id")
        .and_then(Value::as_str)
        .expect("collection id");

    let (status, _) = send_json(
        server.addr,
        "POST",
        &format!("/v1/collections/{id}/images"),
        Some(&owner),
        &json!({"image_id": image_id}),
    )
    .await;
    assert_eq!(status, 200);

    let (status, _) = send_empty(
        server.addr,
        "DELETE",
        &format!("/v1/collections/{id}"),
        Some(&owner),
    )
    .await;
    assert_eq!(status, 200);

    let (status, _) = get_json(server.addr, &format!("/v1/collections/{id}"), Some(&owner)).await;
    assert_eq!(status, 404);
    let (status, _) = get_json(server.addr, &format!("/v1/images/{image_id}"), None).await;
    assert_eq!(status, 200, "images outlive their collections");
}
