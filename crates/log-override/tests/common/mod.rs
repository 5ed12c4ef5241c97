use std::sync::Arc;

use axum::Router;
use log_override::{
    api::{self, admission_review::DEFAULT_ADMISSION_API_VERSION, state::ApiServerState},
    injector::InjectionSettings,
};

pub(crate) fn default_test_state() -> ApiServerState {
    ApiServerState {
        injection_settings: InjectionSettings::default(),
        admission_api_version: DEFAULT_ADMISSION_API_VERSION.to_owned(),
    }
}

pub(crate) fn app(state: ApiServerState) -> Router {
    api::router(Arc::new(state))
}
