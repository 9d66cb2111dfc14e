// Concurrent mutation of the service registry from many tasks
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fleet_gateway::{ServiceRegistry, core::Endpoint};

    const TASKS: usize = 16;
    const CONTAINERS: usize = 50;

    fn endpoint(task: usize, container: usize) -> Endpoint {
        Endpoint::new(
            format!("svc-{task}"),
            format!("c{container}"),
            "1.0",
            vec![format!("http://10.{task}.0.{container}:8080")],
        )
    }

    /// Each task owns its keys: adds every container, removes the odd ones,
    /// re-adds every third one and queries throughout.
    async fn run_task(registry: Arc<ServiceRegistry>, task: usize) {
        let shared = "/fleet/shared";
        let own = format!("/fleet/own/{task}");

        for container in 0..CONTAINERS {
            registry.service_updated(shared, endpoint(task, container)).await;
            registry.service_updated(&own, endpoint(task, container)).await;
            let _ = registry.query(shared).await;
        }
        for container in (1..CONTAINERS).step_by(2) {
            registry.service_removed(shared, &endpoint(task, container)).await;
            registry.service_removed(&own, &endpoint(task, container)).await;
        }
        for container in (0..CONTAINERS).step_by(3) {
            registry.service_updated(shared, endpoint(task, container)).await;
            registry.service_updated(&own, endpoint(task, container)).await;
            let _ = registry.snapshot().await;
        }
        // Withdrawals are no-ops
        registry
            .service_updated(
                &own,
                Endpoint::new(format!("svc-{task}"), "c0", "1.0", vec![]),
            )
            .await;
    }

    fn expected(task: usize) -> Vec<Endpoint> {
        (0..CONTAINERS)
            .filter(|container| container % 2 == 0 || container % 3 == 0)
            .map(|container| endpoint(task, container))
            .collect()
    }

    fn sorted(mut endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        endpoints.sort_by(|a, b| {
            (&a.service_id, &a.container_id).cmp(&(&b.service_id, &b.container_id))
        });
        endpoints
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_match_serial_result() {
        let registry = Arc::new(ServiceRegistry::new());

        let tasks: Vec<_> = (0..TASKS)
            .map(|task| tokio::spawn(run_task(registry.clone(), task)))
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        for task in 0..TASKS {
            let own = sorted(registry.query(&format!("/fleet/own/{task}")).await);
            assert_eq!(own, sorted(expected(task)), "task {task}");
        }

        let shared = sorted(registry.query("/fleet/shared").await);
        let all: Vec<Endpoint> = (0..TASKS).flat_map(expected).collect();
        assert_eq!(shared, sorted(all));
        assert_eq!(registry.len(), TASKS + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_removing_everything_empties_the_registry() {
        let registry = Arc::new(ServiceRegistry::new());

        let tasks: Vec<_> = (0..TASKS)
            .map(|task| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let path = format!("/fleet/tmp/{}", task % 4);
                    for container in 0..CONTAINERS {
                        registry.service_updated(&path, endpoint(task, container)).await;
                    }
                    for container in 0..CONTAINERS {
                        registry.service_removed(&path, &endpoint(task, container)).await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(registry.is_empty());
        assert!(registry.paths().await.is_empty());
    }
}
