use crate::injector::InjectionSettings;

pub struct ApiServerState {
    pub injection_settings: InjectionSettings,
    /// The only `apiVersion` accepted for incoming AdmissionReview objects
    pub admission_api_version: String,
}
