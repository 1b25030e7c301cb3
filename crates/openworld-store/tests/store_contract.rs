// SPDX-License-Identifier: Apache-2.0

use chrono::{Duration, Utc};
use openworld_model::{
    Bio, CollectionDescription, CollectionId, CollectionTitle, CommentBody, Email,
    ImageDescription, ImageId, ImageTitle, Role, TagSet, User, UserId, UserName,
};
use openworld_store::{
    add_collection_image, add_comment, count_images_by_user, delete_collection, delete_comment,
    delete_image, delete_user, fetch_collection, fetch_collection_owner, fetch_image,
    fetch_image_owner, fetch_user, fetch_user_by_email, fetch_user_by_reset_token,
    insert_collection, insert_image, insert_user, list_collections, list_users, query_feed,
    remove_collection_image, set_reset_token, toggle_like, toggle_save, update_collection,
    update_image, update_password, update_profile, update_profile_image, CollectionUpdate,
    Database, FeedRow, ImageFeedQuery, ImageUpdate, NewCollection, NewImage, NewUser,
    ProfileUpdate, StoreErrorCode,
};
use rusqlite::Connection;

fn open_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open(dir.path().join("openworld.db")).expect("open database");
    (dir, db)
}

fn seed_user(conn: &Connection, name: &str, email: &str) -> User {
    let new = NewUser {
        id: UserId::new_random(),
        name: UserName::parse(name).expect("name"),
        email: Email::parse(email).expect("email"),
        password_hash: "pbkdf2-sha256$1$c2FsdA$aGFzaA".to_string(),
        role: Role::User,
        profile_image_url: String::new(),
        bio: Bio::default(),
    };
    insert_user(conn, &new).expect("insert user")
}

fn seed_image(conn: &mut Connection, by: &UserId, title: &str, tags: &str) -> FeedRow {
    let id = ImageId::new_random();
    let new = NewImage {
        id,
        title: ImageTitle::parse(title).expect("title"),
        description: ImageDescription::parse("").expect("description"),
        tags: TagSet::parse_csv(tags).expect("tags"),
        media_url: format!("/media/images/{id}.jpg"),
        storage_key: Some(format!("images/{id}.jpg")),
        uploaded_by: *by,
    };
    insert_image(conn, &new).expect("insert image")
}

fn seed_collection(conn: &Connection, owner: &UserId, title: &str, is_private: bool) -> CollectionId {
    let new = NewCollection {
        id: CollectionId::new_random(),
        title: CollectionTitle::parse(title).expect("title"),
        description: CollectionDescription::parse("").expect("description"),
        owner: *owner,
        is_private,
    };
    insert_collection(conn, &new).expect("insert collection").collection.id
}

fn feed(conn: &Connection, query: &ImageFeedQuery, viewer: Option<&UserId>) -> Vec<FeedRow> {
    query_feed(conn, query, viewer).expect("query feed").rows
}

#[test]
fn user_round_trip_and_email_lookup() {
    let (_dir, db) = open_db();
    let conn = db.connect().expect("connect");
    let user = seed_user(&conn, "Ada Lovelace", "ada@example.com");

    let fetched = fetch_user(&conn, &user.id).expect("fetch").expect("present");
    assert_eq!(fetched, user);

    let creds = fetch_user_by_email(&conn, &Email::parse("ada@example.com").expect("email"))
        .expect("fetch by email")
        .expect("present");
    assert_eq!(creds.user.id, user.id);
    assert!(creds.password_hash.starts_with("pbkdf2-sha256$"));

    let missing = fetch_user(&conn, &UserId::new_random()).expect("fetch");
    assert!(missing.is_none());
}

#[test]
fn duplicate_email_conflicts_case_insensitively() {
    let (_dir, db) = open_db();
    let conn = db.connect().expect("connect");
    seed_user(&conn, "Ada", "ada@example.com");

    let dup = NewUser {
        id: UserId::new_random(),
        name: UserName::parse("Other Ada").expect("name"),
        email: Email::parse("ADA@example.com").expect("email"),
        password_hash: "x".to_string(),
        role: Role::User,
        profile_image_url: String::new(),
        bio: Bio::default(),
    };
    let err = insert_user(&conn, &dup).expect_err("duplicate email must fail");
    assert_eq!(err.code, StoreErrorCode::Conflict);
}

#[test]
fn profile_update_touches_only_requested_fields() {
    let (_dir, db) = open_db();
    let conn = db.connect().expect("connect");
    let user = seed_user(&conn, "Ada", "ada@example.com");

    let updated = update_profile(
        &conn,
        &user.id,
        &ProfileUpdate {
            name: None,
            bio: Some(Bio::parse("builds engines").expect("bio")),
            profile_image_url: None,
        },
    )
    .expect("update profile");
    assert_eq!(updated.name, user.name);
    assert_eq!(updated.bio.as_str(), "builds engines");
    assert!(updated.updated_at >= user.updated_at);

    let err = update_profile(
        &conn,
        &UserId::new_random(),
        &ProfileUpdate {
            name: Some(UserName::parse("Ghost").expect("name")),
            bio: None,
            profile_image_url: None,
        },
    )
    .expect_err("missing user");
    assert_eq!(err.code, StoreErrorCode::NotFound);
}

#[test]
fn profile_image_swap_reports_previous_key() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let user = seed_user(&conn, "Ada", "ada@example.com");

    let (updated, old) =
        update_profile_image(&mut conn, &user.id, "/media/profiles/a.jpg", "profiles/a.jpg")
            .expect("first upload");
    assert_eq!(updated.profile_image_url, "/media/profiles/a.jpg");
    assert!(old.is_none());

    let (_, old) =
        update_profile_image(&mut conn, &user.id, "/media/profiles/b.jpg", "profiles/b.jpg")
            .expect("second upload");
    assert_eq!(old.as_deref(), Some("profiles/a.jpg"));
}

#[test]
fn reset_token_flow_expires_and_burns() {
    let (_dir, db) = open_db();
    let conn = db.connect().expect("connect");
    let user = seed_user(&conn, "Ada", "ada@example.com");
    let now = Utc::now();

    set_reset_token(&conn, &user.id, "deadbeef", now + Duration::minutes(10))
        .expect("set token");
    let found = fetch_user_by_reset_token(&conn, "deadbeef", now)
        .expect("fetch live token")
        .expect("present");
    assert_eq!(found.id, user.id);

    assert!(fetch_user_by_reset_token(&conn, "deadbeef", now + Duration::minutes(11))
        .expect("fetch expired token")
        .is_none());
    assert!(fetch_user_by_reset_token(&conn, "wrong", now)
        .expect("fetch wrong token")
        .is_none());

    update_password(&conn, &user.id, "pbkdf2-sha256$1$bmV3$bmV3").expect("update password");
    assert!(fetch_user_by_reset_token(&conn, "deadbeef", now)
        .expect("fetch burned token")
        .is_none());
    let creds = fetch_user_by_email(&conn, &user.email)
        .expect("fetch")
        .expect("present");
    assert_eq!(creds.password_hash, "pbkdf2-sha256$1$bmV3$bmV3");
}

#[test]
fn list_users_includes_every_account() {
    let (_dir, db) = open_db();
    let conn = db.connect().expect("connect");
    seed_user(&conn, "Ada", "ada@example.com");
    seed_user(&conn, "Grace", "grace@example.com");
    seed_user(&conn, "Edsger", "edsger@example.com");

    let users = list_users(&conn).expect("list");
    assert_eq!(users.len(), 3);
}

#[test]
fn delete_user_cascades_and_returns_storage_keys() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let grace = seed_user(&conn, "Grace", "grace@example.com");

    let row = seed_image(&mut conn, &ada.id, "Difference engine", "engineering,history");
    let image_key = row.image.storage_key.clone().expect("key");
    update_profile_image(&mut conn, &ada.id, "/media/profiles/ada.jpg", "profiles/ada.jpg")
        .expect("profile image");

    add_comment(
        &mut conn,
        &row.image.id,
        &grace.id,
        &CommentBody::parse("marvelous").expect("body"),
    )
    .expect("comment");
    toggle_like(&mut conn, &row.image.id, &grace.id).expect("like");
    toggle_save(&mut conn, &row.image.id, &grace.id).expect("save");

    let mut keys = delete_user(&mut conn, &ada.id).expect("delete user");
    keys.sort();
    assert_eq!(keys, vec![image_key, "profiles/ada.jpg".to_string()]);

    assert!(fetch_user(&conn, &ada.id).expect("fetch").is_none());
    assert!(fetch_image(&conn, &row.image.id, None).expect("fetch").is_none());
    assert!(fetch_user(&conn, &grace.id).expect("fetch").is_some());

    let results = feed(
        &conn,
        &ImageFeedQuery {
            search: Some("difference".to_string()),
            ..ImageFeedQuery::default()
        },
        None,
    );
    assert!(results.is_empty());
}

#[test]
fn inserted_image_lands_in_feed_with_ordered_tags() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");

    let row = seed_image(&mut conn, &ada.id, "Sunset over lake", "zebra,alpha,midtone");
    let tags: Vec<&str> = row.image.tags.iter().map(|t| t.as_str()).collect();
    assert_eq!(tags, vec!["zebra", "alpha", "midtone"]);
    assert_eq!(row.uploader.id, ada.id);
    assert_eq!(row.like_count, 0);
    assert!(!row.liked);

    let rows = feed(&conn, &ImageFeedQuery::default(), None);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].image.id, row.image.id);
    let feed_tags: Vec<&str> = rows[0].image.tags.iter().map(|t| t.as_str()).collect();
    assert_eq!(feed_tags, vec!["zebra", "alpha", "midtone"]);

    assert_eq!(count_images_by_user(&conn, &ada.id).expect("count"), 1);
    assert_eq!(
        fetch_image_owner(&conn, &row.image.id).expect("owner"),
        Some(ada.id)
    );
}

#[test]
fn feed_filters_compose() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let grace = seed_user(&conn, "Grace", "grace@example.com");

    let sunset = seed_image(&mut conn, &ada.id, "Sunset over lake", "nature,water");
    let compiler = seed_image(&mut conn, &grace.id, "Compiler diagrams", "computing");
    seed_image(&mut conn, &ada.id, "Harbor at dawn", "water,boats");

    let by_tag = feed(
        &conn,
        &ImageFeedQuery {
            tags: TagSet::parse_csv("computing").expect("tags").into_iter().collect(),
            ..ImageFeedQuery::default()
        },
        None,
    );
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].image.id, compiler.image.id);

    let by_search = feed(
        &conn,
        &ImageFeedQuery {
            search: Some("sunset".to_string()),
            ..ImageFeedQuery::default()
        },
        None,
    );
    assert_eq!(by_search.len(), 1);
    assert_eq!(by_search[0].image.id, sunset.image.id);

    let by_uploader = feed(
        &conn,
        &ImageFeedQuery {
            uploaded_by: Some(ada.id),
            ..ImageFeedQuery::default()
        },
        None,
    );
    assert_eq!(by_uploader.len(), 2);

    toggle_save(&mut conn, &sunset.image.id, &grace.id).expect("save");
    let by_saver = feed(
        &conn,
        &ImageFeedQuery {
            saved_by: Some(grace.id),
            ..ImageFeedQuery::default()
        },
        Some(&grace.id),
    );
    assert_eq!(by_saver.len(), 1);
    assert!(by_saver[0].saved);

    let nothing = feed(
        &conn,
        &ImageFeedQuery {
            tags: TagSet::parse_csv("water").expect("tags").into_iter().collect(),
            uploaded_by: Some(grace.id),
            ..ImageFeedQuery::default()
        },
        None,
    );
    assert!(nothing.is_empty());
}

#[test]
fn feed_pagination_reports_totals() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    for n in 0..5 {
        seed_image(&mut conn, &ada.id, &format!("Frame {n}"), "series");
    }

    let first = query_feed(
        &conn,
        &ImageFeedQuery {
            limit: 2,
            ..ImageFeedQuery::default()
        },
        None,
    )
    .expect("page 1");
    assert_eq!(first.total, 5);
    assert_eq!(first.pages, 3);
    assert_eq!(first.page, 1);
    assert_eq!(first.rows.len(), 2);

    let last = query_feed(
        &conn,
        &ImageFeedQuery {
            page: 3,
            limit: 2,
            ..ImageFeedQuery::default()
        },
        None,
    )
    .expect("page 3");
    assert_eq!(last.rows.len(), 1);

    let beyond = query_feed(
        &conn,
        &ImageFeedQuery {
            page: 9,
            limit: 2,
            ..ImageFeedQuery::default()
        },
        None,
    )
    .expect("page 9");
    assert!(beyond.rows.is_empty());
    assert_eq!(beyond.total, 5);
}

#[test]
fn likes_and_saves_toggle() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let grace = seed_user(&conn, "Grace", "grace@example.com");
    let row = seed_image(&mut conn, &ada.id, "Sunset", "nature");

    let on = toggle_like(&mut conn, &row.image.id, &grace.id).expect("like on");
    assert!(on.liked);
    assert_eq!(on.like_count, 1);
    let off = toggle_like(&mut conn, &row.image.id, &grace.id).expect("like off");
    assert!(!off.liked);
    assert_eq!(off.like_count, 0);

    let saved = toggle_save(&mut conn, &row.image.id, &grace.id).expect("save on");
    assert!(saved.saved);
    assert_eq!(saved.save_count, 1);

    let err = toggle_like(&mut conn, &ImageId::new_random(), &grace.id)
        .expect_err("missing image");
    assert_eq!(err.code, StoreErrorCode::NotFound);
}

#[test]
fn comments_append_in_order_and_delete() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let grace = seed_user(&conn, "Grace", "grace@example.com");
    let row = seed_image(&mut conn, &ada.id, "Sunset", "nature");

    let first = add_comment(
        &mut conn,
        &row.image.id,
        &grace.id,
        &CommentBody::parse("first!").expect("body"),
    )
    .expect("comment 1");
    assert_eq!(first.author.id, grace.id);
    let second = add_comment(
        &mut conn,
        &row.image.id,
        &ada.id,
        &CommentBody::parse("thanks").expect("body"),
    )
    .expect("comment 2");

    let detail = fetch_image(&conn, &row.image.id, None)
        .expect("fetch")
        .expect("present");
    assert_eq!(detail.row.comment_count, 2);
    let ids: Vec<_> = detail.comments.iter().map(|c| c.comment.id).collect();
    assert_eq!(ids, vec![first.comment.id, second.comment.id]);

    delete_comment(&conn, &row.image.id, &first.comment.id).expect("delete");
    let err = delete_comment(&conn, &row.image.id, &first.comment.id)
        .expect_err("already deleted");
    assert_eq!(err.code, StoreErrorCode::NotFound);
}

#[test]
fn image_update_rewrites_tags_and_search_index() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let row = seed_image(&mut conn, &ada.id, "Sunset over lake", "nature");

    let updated = update_image(
        &mut conn,
        &row.image.id,
        &ImageUpdate {
            title: Some(ImageTitle::parse("Harbor at dawn").expect("title")),
            description: None,
            tags: Some(TagSet::parse_csv("boats,harbor").expect("tags")),
        },
        None,
    )
    .expect("update");
    assert_eq!(updated.image.title.as_str(), "Harbor at dawn");
    let tags: Vec<&str> = updated.image.tags.iter().map(|t| t.as_str()).collect();
    assert_eq!(tags, vec!["boats", "harbor"]);

    assert!(feed(
        &conn,
        &ImageFeedQuery {
            search: Some("sunset".to_string()),
            ..ImageFeedQuery::default()
        },
        None,
    )
    .is_empty());
    assert_eq!(
        feed(
            &conn,
            &ImageFeedQuery {
                search: Some("harbor".to_string()),
                ..ImageFeedQuery::default()
            },
            None,
        )
        .len(),
        1
    );

    let err = update_image(
        &mut conn,
        &ImageId::new_random(),
        &ImageUpdate {
            title: Some(ImageTitle::parse("Ghost").expect("title")),
            description: None,
            tags: None,
        },
        None,
    )
    .expect_err("missing image");
    assert_eq!(err.code, StoreErrorCode::NotFound);
}

#[test]
fn delete_image_returns_storage_key() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let row = seed_image(&mut conn, &ada.id, "Sunset", "nature");

    let key = delete_image(&mut conn, &row.image.id).expect("delete");
    assert_eq!(key, row.image.storage_key);
    assert!(fetch_image(&conn, &row.image.id, None).expect("fetch").is_none());

    let err = delete_image(&mut conn, &row.image.id).expect_err("already gone");
    assert_eq!(err.code, StoreErrorCode::NotFound);
}

#[test]
fn collection_membership_round_trip() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let sunset = seed_image(&mut conn, &ada.id, "Sunset", "nature");
    let harbor = seed_image(&mut conn, &ada.id, "Harbor", "boats");
    let id = seed_collection(&conn, &ada.id, "Seascapes", false);

    let detail = add_collection_image(&mut conn, &id, &sunset.image.id, None).expect("add first");
    assert_eq!(detail.images.len(), 1);
    let detail = add_collection_image(&mut conn, &id, &harbor.image.id, None).expect("add second");
    let member_ids: Vec<_> = detail.images.iter().map(|r| r.image.id).collect();
    assert_eq!(member_ids, vec![sunset.image.id, harbor.image.id]);

    let err = add_collection_image(&mut conn, &id, &sunset.image.id, None)
        .expect_err("duplicate member");
    assert_eq!(err.code, StoreErrorCode::Conflict);

    let rows = list_collections(&conn, &ada.id, true).expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].image_count, 2);
    assert_eq!(rows[0].cover_url.as_deref(), Some(sunset.image.media_url.as_str()));

    remove_collection_image(&conn, &id, &sunset.image.id).expect("remove");
    let err = remove_collection_image(&conn, &id, &sunset.image.id).expect_err("already removed");
    assert_eq!(err.code, StoreErrorCode::NotFound);

    let detail = fetch_collection(&conn, &id, None).expect("fetch").expect("present");
    assert_eq!(detail.images.len(), 1);
    assert_eq!(detail.images[0].image.id, harbor.image.id);
}

#[test]
fn private_collections_stay_out_of_public_listings() {
    let (_dir, db) = open_db();
    let conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    seed_collection(&conn, &ada.id, "Public shelf", false);
    let hidden = seed_collection(&conn, &ada.id, "Drafts", true);

    let public_view = list_collections(&conn, &ada.id, false).expect("public list");
    assert_eq!(public_view.len(), 1);
    assert_eq!(public_view[0].collection.title.as_str(), "Public shelf");

    let owner_view = list_collections(&conn, &ada.id, true).expect("owner list");
    assert_eq!(owner_view.len(), 2);

    assert_eq!(
        fetch_collection_owner(&conn, &hidden).expect("owner"),
        Some((ada.id, true))
    );
}

#[test]
fn collection_update_and_delete() {
    let (_dir, db) = open_db();
    let conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let id = seed_collection(&conn, &ada.id, "Seascapes", false);

    let updated = update_collection(
        &conn,
        &id,
        &CollectionUpdate {
            title: None,
            description: Some(CollectionDescription::parse("water everywhere").expect("desc")),
            is_private: Some(true),
        },
    )
    .expect("update");
    assert!(updated.collection.is_private);
    assert_eq!(updated.collection.description.as_str(), "water everywhere");
    assert_eq!(updated.collection.title.as_str(), "Seascapes");

    delete_collection(&conn, &id).expect("delete");
    assert!(fetch_collection(&conn, &id, None).expect("fetch").is_none());
    let err = delete_collection(&conn, &id).expect_err("already gone");
    assert_eq!(err.code, StoreErrorCode::NotFound);
}

#[test]
fn collection_detail_carries_viewer_flags() {
    let (_dir, db) = open_db();
    let mut conn = db.connect().expect("connect");
    let ada = seed_user(&conn, "Ada", "ada@example.com");
    let grace = seed_user(&conn, "Grace", "grace@example.com");
    let sunset = seed_image(&mut conn, &ada.id, "Sunset", "nature");
    let id = seed_collection(&conn, &ada.id, "Seascapes", false);
    add_collection_image(&mut conn, &id, &sunset.image.id, None).expect("add");
    toggle_like(&mut conn, &sunset.image.id, &grace.id).expect("like");

    let anonymous = fetch_collection(&conn, &id, None).expect("fetch").expect("present");
    assert_eq!(anonymous.images[0].like_count, 1);
    assert!(!anonymous.images[0].liked);

    let viewer = fetch_collection(&conn, &id, Some(&grace.id))
        .expect("fetch")
        .expect("present");
    assert!(viewer.images[0].liked);
}
