use crate::{
    config::Polling,
    error::{Error, Result},
    resources::ResourceProvisioner,
};
use k8s_openapi::api::{apps::v1::Deployment, batch::v1::Job, core::v1::Pod};
use std::future::Future;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Outcome of a single readiness check
#[derive(Debug)]
pub enum Poll {
    NotReady,
    Ready,
    Fatal(Error),
}

impl Poll {
    /// Transient lookup failures are retried, everything else aborts the wait
    pub fn from_error(err: Error) -> Self {
        if err.is_transient() {
            Poll::NotReady
        } else {
            Poll::Fatal(err)
        }
    }

    fn ready_if(condition: bool) -> Self {
        if condition {
            Poll::Ready
        } else {
            Poll::NotReady
        }
    }
}

/// Poll `predicate` every `polling.interval` until it is ready or `polling.timeout` elapses.
///
/// The predicate runs once immediately. The last sleep is shortened so the final check
/// happens at the deadline.
pub async fn wait<F, Fut>(what: &str, polling: Polling, mut predicate: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Poll>,
{
    let deadline = Instant::now() + polling.timeout;
    loop {
        match predicate().await {
            Poll::Ready => return Ok(()),
            Poll::Fatal(err) => return Err(err),
            Poll::NotReady => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                what: what.to_string(),
                timeout: polling.timeout,
            });
        }
        debug!("Waiting for {}", what);
        sleep(polling.interval.min(deadline - now)).await;
    }
}

/// Wait for a service to exist, or with `exist == false` to disappear
pub async fn wait_for_service(
    resources: &dyn ResourceProvisioner,
    namespace: &str,
    name: &str,
    exist: bool,
    polling: Polling,
) -> Result<()> {
    let what = format!("service {}/{} to {}", namespace, name, if exist { "exist" } else { "be deleted" });
    wait(&what, polling, move || async move {
        match resources.get_service(namespace, name).await {
            Ok(service) => Poll::ready_if(service.is_some() == exist),
            Err(err) => Poll::from_error(err),
        }
    })
    .await
}

pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn pods_running(pods: &[Pod], is_current: impl Fn(&Pod) -> bool) -> bool {
    !pods.is_empty()
        && pods
            .iter()
            .all(|pod| is_current(pod) && pod_phase(pod) == "Running")
}

/// Wait until at least one pod matches `label_selector` and all matching pods are running
pub async fn wait_for_pods_with_label_running(
    resources: &dyn ResourceProvisioner,
    namespace: &str,
    label_selector: &str,
    polling: Polling,
) -> Result<()> {
    wait_for_current_pods_running(resources, namespace, label_selector, |_| true, polling).await
}

/// Like [`wait_for_pods_with_label_running`], but pods rejected by `is_current` must be gone.
///
/// Used after a rollout so pods of the previous template, which may still be running,
/// do not satisfy the wait.
pub async fn wait_for_current_pods_running<F>(
    resources: &dyn ResourceProvisioner,
    namespace: &str,
    label_selector: &str,
    is_current: F,
    polling: Polling,
) -> Result<()>
where
    F: Fn(&Pod) -> bool,
{
    let what = format!("pods {} in {} to be running", label_selector, namespace);
    let is_current = &is_current;
    wait(&what, polling, move || async move {
        match resources.list_pods(namespace, label_selector).await {
            Ok(pods) => Poll::ready_if(pods_running(&pods, is_current)),
            Err(err) => Poll::from_error(err),
        }
    })
    .await
}

fn job_complete(job: &Job) -> Poll {
    let conditions = job
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .filter(|c| c.status == "True");

    for condition in conditions {
        match condition.type_.as_str() {
            "Complete" => return Poll::Ready,
            "Failed" => {
                return Poll::Fatal(Error::WaitFailed {
                    what: format!("job {}", job.metadata.name.as_deref().unwrap_or_default()),
                    reason: condition
                        .message
                        .clone()
                        .unwrap_or_else(|| "job failed".to_string()),
                })
            }
            _ => {}
        }
    }
    Poll::NotReady
}

/// Wait for a job to complete; a failed job aborts the wait
pub async fn wait_for_job_complete(
    resources: &dyn ResourceProvisioner,
    namespace: &str,
    name: &str,
    polling: Polling,
) -> Result<()> {
    let what = format!("job {}/{} to complete", namespace, name);
    wait(&what, polling, move || async move {
        match resources.get_job(namespace, name).await {
            Ok(Some(job)) => job_complete(&job),
            Ok(None) => Poll::NotReady,
            Err(err) => Poll::from_error(err),
        }
    })
    .await
}

fn deployment_stable(deployment: &Deployment) -> bool {
    let generation = deployment.metadata.generation.unwrap_or_default();
    let status = deployment.status.clone().unwrap_or_default();
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);

    generation <= status.observed_generation.unwrap_or_default()
        && status.replicas.unwrap_or_default() == desired
}

/// Wait for the deployment controller to observe the latest spec and settle its replicas
pub async fn wait_for_deployment_stable(
    resources: &dyn ResourceProvisioner,
    namespace: &str,
    name: &str,
    polling: Polling,
) -> Result<()> {
    let what = format!("deployment {}/{} to stabilize", namespace, name);
    wait(&what, polling, move || async move {
        match resources.get_deployment(namespace, name).await {
            Ok(Some(deployment)) => Poll::ready_if(deployment_stable(&deployment)),
            Ok(None) => Poll::Fatal(Error::WaitFailed {
                what: format!("deployment {}/{}", namespace, name),
                reason: "deployment was deleted".to_string(),
            }),
            Err(err) => Poll::from_error(err),
        }
    })
    .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{error::api_error, resources::MockResourceProvisioner};
    use k8s_openapi::api::{
        apps::v1::{DeploymentSpec, DeploymentStatus},
        batch::v1::{JobCondition, JobStatus},
        core::v1::{Container, EnvVar, PodSpec, PodStatus},
    };
    use kube::api::ObjectMeta;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    pub fn pod(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn job(condition: Option<(&str, &str)>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("my-app-jx-expose".to_string()),
                ..Default::default()
            },
            status: Some(JobStatus {
                conditions: condition.map(|(type_, status)| {
                    vec![JobCondition {
                        type_: type_.to_string(),
                        status: status.to_string(),
                        message: Some("BackoffLimitExceeded".to_string()),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn deployment(generation: i64, observed: i64, desired: i32, replicas: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(generation),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(observed),
                replicas: Some(replicas),
                ..Default::default()
            }),
        }
    }

    fn polling(interval: u64, timeout: u64) -> Polling {
        Polling::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_within_one_interval() {
        let start = Instant::now();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result = wait("nothing", polling(7, 30), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Poll::NotReady
        })
        .await;

        let elapsed = start.elapsed();
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed <= Duration::from_secs(37));
        // checks at 0, 7, 14, 21, 28 and the deadline
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_when_ready() {
        let start = Instant::now();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = wait("third check", polling(10, 60), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                    Poll::Ready
                } else {
                    Poll::NotReady
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_stops_on_fatal() {
        let result = wait("fatal", polling(10, 60), || async {
            Poll::Fatal(Error::ConfigError("boom".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_from_error_classification() {
        assert!(matches!(Poll::from_error(api_error(500, "InternalError")), Poll::NotReady));
        assert!(matches!(Poll::from_error(api_error(429, "TooManyRequests")), Poll::NotReady));
        assert!(matches!(Poll::from_error(api_error(403, "Forbidden")), Poll::Fatal(_)));
    }

    fn with_env(mut pod: Pod, value: &str) -> Pod {
        pod.spec = Some(PodSpec {
            containers: vec![Container {
                env: Some(vec![EnvVar {
                    name: "VERSION".to_string(),
                    value: Some(value.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        });
        pod
    }

    fn has_version(version: &'static str) -> impl Fn(&Pod) -> bool {
        move |pod| {
            pod.spec
                .iter()
                .flat_map(|spec| spec.containers.iter())
                .flat_map(|c| c.env.iter().flatten())
                .any(|env| env.value.as_deref() == Some(version))
        }
    }

    #[test]
    fn test_pods_running() {
        assert!(!pods_running(&[], |_| true));
        assert!(!pods_running(&[pod("Running"), pod("Pending")], |_| true));
        assert!(pods_running(&[pod("Running"), pod("Running")], |_| true));
    }

    #[test]
    fn test_pods_of_previous_template_block_the_wait() {
        let old = with_env(pod("Running"), "v1");
        let new = with_env(pod("Running"), "v2");
        assert!(!pods_running(&[old.clone(), new.clone()], has_version("v2")));
        assert!(!pods_running(&[old], has_version("v2")));
        assert!(pods_running(&[new], has_version("v2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_current_pods_outlasts_old_pod() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockResourceProvisioner::new();
        mock.expect_list_pods().returning(move |_, _| {
            let new = with_env(pod("Running"), "v2");
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(vec![with_env(pod("Running"), "v1"), new])
            } else {
                Ok(vec![new])
            }
        });

        wait_for_current_pods_running(&mock, "jx", "sso=my-app", has_version("v2"), polling(1, 10))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_job_complete() {
        assert!(matches!(job_complete(&job(None)), Poll::NotReady));
        assert!(matches!(job_complete(&job(Some(("SuccessCriteriaMet", "True")))), Poll::NotReady));
        assert!(matches!(job_complete(&job(Some(("Complete", "False")))), Poll::NotReady));
        assert!(matches!(job_complete(&job(Some(("Complete", "True")))), Poll::Ready));
        match job_complete(&job(Some(("Failed", "True")))) {
            Poll::Fatal(err) => assert!(err.to_string().contains("BackoffLimitExceeded")),
            other => panic!("expected fatal, got {:?}", other),
        }
    }

    #[test]
    fn test_deployment_stable() {
        assert!(deployment_stable(&deployment(2, 2, 1, 1)));
        assert!(!deployment_stable(&deployment(3, 2, 1, 1)));
        assert!(!deployment_stable(&deployment(2, 2, 1, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_retries_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mock = MockResourceProvisioner::new();
        let counter = calls.clone();
        mock.expect_get_service().returning(move |_, _| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(api_error(500, "InternalError")),
                1 => Ok(None),
                _ => Ok(Some(Default::default())),
            }
        });

        wait_for_service(&mock, "jx", "my-app", true, polling(1, 10))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_absence() {
        let mut mock = MockResourceProvisioner::new();
        mock.expect_get_service().returning(|_, _| Ok(None));
        wait_for_service(&mock, "jx", "my-app", false, polling(1, 10))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_job_fails_fast_on_forbidden() {
        let mut mock = MockResourceProvisioner::new();
        mock.expect_get_job()
            .times(1)
            .returning(|_, _| Err(api_error(403, "Forbidden")));
        let result = wait_for_job_complete(&mock, "jx", "my-app-jx-expose", polling(1, 10)).await;
        assert!(matches!(result, Err(Error::KubeError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deployment_vanished_is_fatal() {
        let mut mock = MockResourceProvisioner::new();
        mock.expect_get_deployment().returning(|_, _| Ok(None));
        let result = wait_for_deployment_stable(&mock, "jx", "my-app-jx", polling(1, 10)).await;
        assert!(matches!(result, Err(Error::WaitFailed { .. })));
    }
}
