use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    kv::KeyValueStore,
    notify::Mailer,
    recommend::RecommendationClient,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub kv: Arc<dyn KeyValueStore>,
    pub mailer: Arc<dyn Mailer>,
    pub recommend: RecommendationClient,
    pub config: Arc<AppConfig>,
}
