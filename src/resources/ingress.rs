use crate::error::{Error, Result};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};

/// Hosts of all rules of an ingress, in rule order
pub fn rule_hosts(ingress: &Ingress) -> Vec<String> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .filter_map(|rule| rule.host.clone())
        .filter(|host| !host.is_empty())
        .collect()
}

pub async fn hosts(client: &Client, namespace: &str, name: &str) -> Result<Vec<String>> {
    let api: Api<Ingress> = Api::namespaced(client.clone(), namespace);

    let ingress = api
        .get_opt(name)
        .await?
        .ok_or_else(|| Error::IngressNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    Ok(rule_hosts(&ingress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec};

    #[test]
    fn test_rule_hosts() {
        let ingress = Ingress {
            spec: Some(IngressSpec {
                rules: Some(vec![
                    IngressRule {
                        host: Some("jenkins.jx.example.com".to_string()),
                        ..Default::default()
                    },
                    IngressRule {
                        host: None,
                        ..Default::default()
                    },
                    IngressRule {
                        host: Some("jenkins.example.org".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(
            rule_hosts(&ingress),
            vec!["jenkins.jx.example.com", "jenkins.example.org"]
        );
    }

    #[test]
    fn test_rule_hosts_without_spec() {
        assert!(rule_hosts(&Ingress::default()).is_empty());
    }
}
