use garagehub::db;
use log::info;

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let pool = db::get_db_pool().await;
    db::run_migrations(&pool)
        .await
        .expect("Failed to apply migrations");

    info!("schema is up to date");
}
