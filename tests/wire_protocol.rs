use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use assetd::inventory::{InventoryManager, InventorySettings};
use assetd::notify::Recipient;
use assetd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<InventoryManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("assetd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let im = Arc::new(InventoryManager::new(dir, InventorySettings::default()));

    let im2 = im.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let im = im2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, im, "assetd".to_string(), None).await;
            });
        }
    });

    (addr, im)
}

async fn connect(addr: SocketAddr, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("it-admin")
        .password("assetd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn add_user(client: &tokio_postgres::Client, name: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO users (id, name) VALUES ('{id}', '{name}')"))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn register_and_list_assets() {
    let (addr, _im) = start_test_server().await;
    let client = connect(addr, "ops").await;

    let laptop = Ulid::new();
    let office = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{laptop}', 'LAPTOP-07', 'hardware', NULL)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{office}', 'OFFICE365', 'software', 25)"
        ))
        .await
        .unwrap();

    let assets = rows(client.simple_query("SELECT * FROM assets").await.unwrap());
    assert_eq!(assets.len(), 2);
    // Sorted by tag.
    assert_eq!(assets[0].get("asset_tag"), Some("LAPTOP-07"));
    assert_eq!(assets[0].get("total_licenses"), Some("1"));
    assert_eq!(assets[0].get("status"), Some("AVAILABLE"));
    assert_eq!(assets[1].get("asset_tag"), Some("OFFICE365"));
    assert_eq!(assets[1].get("total_licenses"), Some("25"));

    let err = client
        .batch_execute(&format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{}', 'LAPTOP-07', 'hardware', NULL)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("already exists"));
}

#[tokio::test]
async fn allocation_respects_capacity() {
    let (addr, _im) = start_test_server().await;
    let client = connect(addr, "ops").await;

    let alice = add_user(&client, "Alice").await;
    let bob = add_user(&client, "Bob").await;
    let laptop = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{laptop}', 'LAPTOP-07', 'hardware', NULL)"
        ))
        .await
        .unwrap();

    client
        .batch_execute(&format!(
            "INSERT INTO allocations (asset_id, holder_id, remarks) VALUES ('{laptop}', '{alice}', 'onboarding')"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "INSERT INTO allocations (asset_id, holder_id) VALUES ('{laptop}', '{bob}')"
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "P0001");
    assert!(db.message().contains("at capacity"));

    let seats = rows(
        client
            .simple_query(&format!("SELECT * FROM seats WHERE asset_id = '{laptop}'"))
            .await
            .unwrap(),
    );
    assert_eq!(seats.len(), 1);
    assert_eq!(seats[0].get("used_licenses"), Some("1"));
    assert_eq!(seats[0].get("available_seats"), Some("0"));
    assert_eq!(seats[0].get("status"), Some("ALLOCATED"));

    let holders = rows(
        client
            .simple_query(&format!("SELECT * FROM current_holders WHERE asset_id = '{laptop}'"))
            .await
            .unwrap(),
    );
    assert_eq!(holders.len(), 1);
    let alice_id = alice.to_string();
    assert_eq!(holders[0].get("holder_id"), Some(alice_id.as_str()));
    assert_eq!(holders[0].get("remarks"), Some("onboarding"));
}

#[tokio::test]
async fn multi_row_allocation_reports_each_holder() {
    let (addr, _im) = start_test_server().await;
    let client = connect(addr, "ops").await;

    let users = [
        add_user(&client, "Alice").await,
        add_user(&client, "Bob").await,
        add_user(&client, "Carol").await,
    ];
    let office = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{office}', 'OFFICE365', 'software', 2)"
        ))
        .await
        .unwrap();

    let values: Vec<String> = users
        .iter()
        .map(|u| format!("('{office}', '{u}', 'bulk')"))
        .collect();
    let outcome = rows(
        client
            .simple_query(&format!(
                "INSERT INTO allocations (asset_id, holder_id, remarks) VALUES {}",
                values.join(", ")
            ))
            .await
            .unwrap(),
    );
    assert_eq!(outcome.len(), 3);
    let granted = outcome.iter().filter(|r| r.get("error").is_none()).count();
    assert_eq!(granted, 2);
    let refused: Vec<_> = outcome.iter().filter(|r| r.get("error").is_some()).collect();
    assert_eq!(refused.len(), 1);
    assert!(refused[0].get("allocation_id").is_none());
    assert!(refused[0].get("error").unwrap().contains("at capacity"));
}

#[tokio::test]
async fn return_workflow_over_the_wire() {
    let (addr, im) = start_test_server().await;
    let client = connect(addr, "ops").await;

    let alice = add_user(&client, "Alice").await;
    let laptop = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{laptop}', 'LAPTOP-07', 'hardware', NULL)"
        ))
        .await
        .unwrap();

    let inventory = im.get_or_create("ops").unwrap();
    let mut managers = inventory.notifications.subscribe(Recipient::Managers);

    client
        .batch_execute(&format!(
            "INSERT INTO allocations (asset_id, holder_id) VALUES ('{laptop}', '{alice}')"
        ))
        .await
        .unwrap();

    // Completing before any request is a state error.
    let err = client
        .batch_execute(&format!("INSERT INTO returns (asset_id, holder_id) VALUES ('{laptop}', '{alice}')"))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("invalid return transition"));

    client
        .batch_execute(&format!(
            "INSERT INTO return_requests (asset_id, holder_id, remarks) VALUES ('{laptop}', '{alice}', 'hardware refresh')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO return_acknowledgements (asset_id, holder_id) VALUES ('{laptop}', '{alice}')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO returns (asset_id, holder_id, remarks) VALUES ('{laptop}', '{alice}', 'good condition')"
        ))
        .await
        .unwrap();

    let history = rows(
        client
            .simple_query(&format!("SELECT * FROM allocations WHERE asset_id = '{laptop}'"))
            .await
            .unwrap(),
    );
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("return_status"), Some("COMPLETED"));
    assert_eq!(history[0].get("return_request_remarks"), Some("hardware refresh"));
    assert_eq!(history[0].get("return_remarks"), Some("good condition"));
    assert_eq!(history[0].get("forced"), Some("f"));
    assert!(history[0].get("returned_at").is_some());

    let ack = managers.try_recv().unwrap();
    assert_eq!(ack.message, "Alice acknowledged the return of LAPTOP-07");
    let returned = managers.try_recv().unwrap();
    assert_eq!(returned.message, "Alice returned LAPTOP-07");

    let assets = rows(client.simple_query("SELECT * FROM assets").await.unwrap());
    assert_eq!(assets[0].get("status"), Some("AVAILABLE"));
}

#[tokio::test]
async fn forced_return_and_maintenance_hold() {
    let (addr, _im) = start_test_server().await;
    let client = connect(addr, "ops").await;

    let alice = add_user(&client, "Alice").await;
    let laptop = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{laptop}', 'LAPTOP-07', 'hardware', NULL)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO allocations (asset_id, holder_id) VALUES ('{laptop}', '{alice}')"
        ))
        .await
        .unwrap();

    // A hold cannot be placed while the laptop is out.
    let err = client
        .batch_execute(&format!(
            "INSERT INTO status_overrides (asset_id, status) VALUES ('{laptop}', 'maintenance')"
        ))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("active allocation"));

    client
        .batch_execute(&format!(
            "INSERT INTO forced_returns (asset_id, holder_id) VALUES ('{laptop}', '{alice}')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO status_overrides (asset_id, status) VALUES ('{laptop}', 'maintenance')"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "INSERT INTO allocations (asset_id, holder_id) VALUES ('{laptop}', '{alice}')"
        ))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("MAINTENANCE"));

    let history = rows(
        client
            .simple_query(&format!("SELECT * FROM allocations WHERE asset_id = '{laptop}'"))
            .await
            .unwrap(),
    );
    assert_eq!(history[0].get("forced"), Some("t"));
}

#[tokio::test]
async fn databases_are_separate_inventories() {
    let (addr, _im) = start_test_server().await;
    let finance = connect(addr, "finance").await;
    let engineering = connect(addr, "engineering").await;

    add_user(&finance, "Alice").await;

    let finance_users = rows(finance.simple_query("SELECT * FROM users").await.unwrap());
    let engineering_users = rows(engineering.simple_query("SELECT * FROM users").await.unwrap());
    assert_eq!(finance_users.len(), 1);
    assert_eq!(finance_users[0].get("name"), Some("Alice"));
    assert!(engineering_users.is_empty());
}

#[tokio::test]
async fn bad_sql_is_a_syntax_error() {
    let (addr, _im) = start_test_server().await;
    let client = connect(addr, "ops").await;

    let err = client.batch_execute("DELETE FROM assets").await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "42601");

    let err = client.batch_execute("SELECT * FROM seats").await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "42601");
}
