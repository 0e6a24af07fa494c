use std::sync::Arc;

use boifi_distributor::Distributor;
use boifi_store::PolicyStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PolicyStore>,
    pub distributor: Arc<Distributor>,
    pub auth_token: Arc<String>,
}
