//! Label and naming conventions of the Kalm control plane.

/// Present on namespaces that Kalm manages as applications.
pub const ENABLED: &str = "kalm-enabled";
/// Back-reference from pods/services to their owning component.
pub const COMPONENT: &str = "kalm-component";
/// Marks storage claims provisioned by Kalm (`"true"`).
pub const MANAGED: &str = "kalm-managed";

/// Namespace hosting the control plane itself; never reported as an application.
pub const SYSTEM_NAMESPACE: &str = "kalm-system";
/// Name of the one single-sign-on config clients care about.
pub const SSO_NAME: &str = "sso";

/// Secret holding registry credentials is named `<registry>-authentication`.
pub fn registry_secret_name(registry: &str) -> String {
    format!("{}-authentication", registry)
}
