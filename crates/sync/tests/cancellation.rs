//! Mid-run cancellation against a local mock IIIF server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sync::catalog;
use sync::config::VaultConfig;
use sync::engine::Engine;
use sync::environment::Environment;
use sync::http_client::HttpClient;
use sync::job_manager::{JobManager, JobStatus};

use common::{fake_jpeg, MockServer, Response};

const CANVAS_COUNT: usize = 10;

fn ten_canvas_manifest(base_url: &str) -> serde_json::Value {
    let canvases: Vec<serde_json::Value> = (0..CANVAS_COUNT)
        .map(|i| {
            json!({
                "images": [{
                    "@type": "oa:Annotation",
                    "resource": {
                        "service": { "@id": format!("{base_url}/iiif/canvas{i}") }
                    }
                }]
            })
        })
        .collect();
    json!({
        "label": "Ten page test manuscript",
        "sequences": [{ "canvases": canvases }],
    })
}

#[test]
fn cancelling_mid_run_stops_short_of_full_completion() {
    let server = MockServer::start();
    let base_url = server.base_url();
    for i in 0..CANVAS_COUNT {
        server.set(
            &format!("/iiif/canvas{i}/full/max,/0/default.jpg"),
            Response::jpeg(fake_jpeg(800, 1000)),
        );
    }

    let manifest_raw = ten_canvas_manifest(&base_url);
    let manifest_url = format!("{base_url}/iiif/manifest.json");

    let dir = tempfile::tempdir().unwrap();
    let env = Environment::new(dir.path()).unwrap();
    let catalog = catalog::open(&env.catalog_db_path()).unwrap();
    let client = Arc::new(HttpClient::new());
    let config = VaultConfig::default();

    let manager = JobManager::new(catalog.clone());
    let doc_id = "doc-ten-page".to_string();
    let library = "Gallica".to_string();

    let job_id = {
        let env = env.clone();
        let doc_id = doc_id.clone();
        let library = library.clone();
        let manifest_url = manifest_url.clone();
        let catalog_for_engine = catalog.clone();
        let doc_id_for_closure = doc_id.clone();
        let library_for_closure = library.clone();
        let manifest_url_for_closure = manifest_url.clone();
        manager.submit_download(&doc_id, &library, &manifest_url, move |progress, should_cancel| {
            let engine = Engine::new(client, catalog_for_engine, config);
            engine.run(&env, &doc_id_for_closure, &library_for_closure, &manifest_url_for_closure, &manifest_raw, progress, should_cancel)
        })
    };

    // Wait until the job has recorded at least three completions, then
    // request cancellation — mirrors "after the third completion" without
    // depending on exact completion-order timing.
    let mut cancel_requested = false;
    for _ in 0..400 {
        if let Ok(Some(job)) = catalog::get_job(&catalog, &job_id) {
            if job.current_page >= 3 && !cancel_requested {
                assert!(manager.request_cancel(&job_id));
                cancel_requested = true;
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    assert!(cancel_requested, "job never reached three completions in time");

    let mut final_status = None;
    for _ in 0..400 {
        if let Some(record) = manager.get(&job_id) {
            if matches!(record.status, JobStatus::Cancelled | JobStatus::Completed | JobStatus::Failed) {
                final_status = Some(record.status);
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(25));
    }

    assert_eq!(final_status, Some(JobStatus::Cancelled));

    let manuscript = catalog::get_manuscript(&catalog, &doc_id).unwrap().unwrap();
    assert_eq!(manuscript.status.as_str(), "partial");
    assert!(manuscript.downloaded_canvases <= 4, "downloaded_canvases was {}", manuscript.downloaded_canvases);

    let missing_json = manuscript
        .missing_pages_json
        .as_deref()
        .expect("a partial manuscript must record its missing pages");
    let missing: std::collections::BTreeSet<usize> = serde_json::from_str(missing_json).unwrap();
    assert!(!missing.is_empty());
    assert!(
        missing.iter().all(|&page| (1..=CANVAS_COUNT).contains(&page)),
        "missing pages must be 1-based indices within the manuscript, got {missing:?}"
    );
    assert_eq!(
        missing.len() + manuscript.downloaded_canvases as usize,
        CANVAS_COUNT,
        "downloaded and missing pages must partition the full 1-based page range"
    );
}
