//! End-to-end coverage for the download engine against a local mock IIIF
//! server, rather than mocking `HttpClient` itself.

mod common;

use std::sync::Arc;

use serde_json::json;
use sync::catalog;
use sync::config::VaultConfig;
use sync::engine::Engine;
use sync::environment::Environment;
use sync::http_client::HttpClient;
use sync::progress::{never_cancel, no_op_progress};

use common::{fake_jpeg, MockServer, Response};

fn two_canvas_manifest(base_url: &str) -> serde_json::Value {
    let canvas = |path: &str| {
        json!({
            "images": [{
                "@type": "oa:Annotation",
                "resource": {
                    "service": { "@id": format!("{base_url}{path}") }
                }
            }]
        })
    };
    json!({
        "label": "Two page test manuscript",
        "sequences": [{
            "canvases": [canvas("/iiif/canvas0"), canvas("/iiif/canvas1")]
        }]
    })
}

#[test]
fn native_jpeg_and_tile_stitch_fallback_both_finalize() {
    let server = MockServer::start();
    let base_url = server.base_url();

    // Canvas 0: the first download_strategy entry ("max") succeeds directly.
    server.set("/iiif/canvas0/full/max,/0/default.jpg", Response::jpeg(fake_jpeg(1600, 2200)));

    // Canvas 1: every full-image attempt is forbidden, forcing tile stitch.
    for size in ["max", "3000", "1740"] {
        server.set(&format!("/iiif/canvas1/full/{size},/0/default.jpg"), Response::status(403));
    }
    server.set(
        "/iiif/canvas1/info.json",
        Response::json(json!({
            "width": 1500,
            "height": 1000,
            "tiles": [{"width": 500, "height": 500}],
        })),
    );
    for (x, y) in [(0, 0), (500, 0), (1000, 0), (0, 500), (500, 500), (1000, 500)] {
        server.set(
            &format!("/iiif/canvas1/{x},{y},500,500/500,/0/default.jpg"),
            Response::jpeg(fake_jpeg(500, 500)),
        );
    }

    let manifest_raw = two_canvas_manifest(&base_url);

    let dir = tempfile::tempdir().unwrap();
    let env = Environment::new(dir.path()).unwrap();
    let catalog = catalog::open(&env.catalog_db_path()).unwrap();
    let client = Arc::new(HttpClient::new());
    let config = VaultConfig::default();
    let engine = Engine::new(client, catalog.clone(), config);

    engine
        .run(
            &env,
            "doc-two-page",
            "Gallica",
            &format!("{base_url}/iiif/manifest.json"),
            &manifest_raw,
            no_op_progress(),
            never_cancel(),
        )
        .unwrap();

    let document_root = env.document_root("Gallica", "doc-two-page");
    assert!(document_root.join("scans/pag_0000.jpg").exists());
    assert!(document_root.join("scans/pag_0001.jpg").exists());

    let stats: serde_json::Value =
        serde_json::from_slice(&std::fs::read(document_root.join("data/image_stats.json")).unwrap()).unwrap();
    assert_eq!(stats["pages"].as_array().unwrap().len(), 2);

    let manuscript = catalog::get_manuscript(&catalog, "doc-two-page").unwrap().unwrap();
    assert_eq!(manuscript.status.as_str(), "complete");
    assert_eq!(manuscript.downloaded_canvases, 2);
}
