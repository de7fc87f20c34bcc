use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const RELEASE_LABEL: &str = "release";
pub const SSO_LABEL: &str = "sso";

/// Generate standard labels for all resources
pub fn common_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/managed-by".to_string(), "sso-operator".to_string());
    labels
}

/// Generate selector labels for the proxy pods
pub fn proxy_selector_labels(sso_name: &str, app_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL.to_string(), app_name.to_string());
    labels.insert(SSO_LABEL.to_string(), sso_name.to_string());
    labels
}

/// Generate labels for the proxy resources
pub fn proxy_labels(sso_name: &str, app_name: &str) -> BTreeMap<String, String> {
    let mut labels = common_labels();
    labels.extend(proxy_selector_labels(sso_name, app_name));
    labels
}

/// Label selector matching every proxy pod of an SSO
pub fn proxy_pod_selector(sso_name: &str) -> String {
    format!("{}={}", SSO_LABEL, sso_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_labels_contain_selector() {
        let labels = proxy_labels("my-sso", "jenkins");
        for (key, value) in proxy_selector_labels("my-sso", "jenkins") {
            assert_eq!(labels.get(&key), Some(&value));
        }
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by").map(String::as_str),
            Some("sso-operator")
        );
    }

    #[test]
    fn test_pod_selector() {
        assert_eq!(proxy_pod_selector("my-sso"), "sso=my-sso");
    }
}
