mod common;

use common::*;
use sastgate_core::{
    JobManager, JobState, MemoryJobStore, ReportFormat, ScanRequest, ScannerDispatcher, ToolKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn upload(bytes: Vec<u8>) -> ScanRequest {
    ScanRequest::Archive {
        file_name: "p.zip".to_string(),
        bytes,
        language: None,
        owner: None,
        project_name: None,
    }
}

#[tokio::test]
async fn running_job_is_not_ready_until_it_finishes() {
    let ws = tempfile::tempdir().unwrap();
    let m = JobManager::new(config(ws.path()), Arc::new(MemoryJobStore::new())).unwrap();
    let gate = Arc::new(Notify::new());
    let mut dispatcher = ScannerDispatcher::new(m.config());
    dispatcher.register_adapter(GatedAdapter {
        kind: ToolKind::Patterns,
        gate: gate.clone(),
    });
    let m = m.with_dispatcher(dispatcher);

    let id = m
        .submit(upload(zip_archive(&[("app.py", "x = 1\n")])))
        .await
        .unwrap();

    let mut state = JobState::Pending;
    for _ in 0..500 {
        state = m.status(id).await.unwrap().job.state;
        if state == JobState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, JobState::Running);
    assert!(m.status(id).await.unwrap().findings.is_empty());

    let err = m.export(id, ReportFormat::Json).await.unwrap_err();
    assert_eq!(err.kind(), "JobNotReady");

    gate.notify_one();
    let view = wait_terminal(&m, id).await;
    assert_eq!(view.job.state, JobState::Completed);
    assert_eq!(view.findings.len(), 1);
    assert!(m.export(id, ReportFormat::Json).await.is_ok());
}

#[tokio::test]
async fn failed_job_exports_an_empty_report() {
    let ws = tempfile::tempdir().unwrap();
    let m = JobManager::new(config(ws.path()), Arc::new(MemoryJobStore::new())).unwrap();

    let id = m.submit(upload(b"PK-but-not-really".to_vec())).await.unwrap();
    let view = wait_terminal(&m, id).await;
    assert_eq!(view.job.state, JobState::Failed);

    let csv = m.export(id, ReportFormat::Csv).await.unwrap();
    assert_eq!(
        String::from_utf8(csv.body).unwrap(),
        "file,line,severity,rule,message,category\n"
    );

    let json = m.export(id, ReportFormat::Json).await.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&json.body).unwrap();
    assert_eq!(doc["findings"], serde_json::json!([]));
    assert_eq!(doc["summary"]["total"], 0);
}

#[tokio::test]
async fn exports_record_downloads_and_reject_pdf() {
    let ws = tempfile::tempdir().unwrap();
    let m = JobManager::new(config(ws.path()), Arc::new(MemoryJobStore::new())).unwrap();

    let id = m
        .submit(upload(zip_archive(&[(
            "app.py",
            "import pickle\nobj = pickle.loads(data)\n",
        )])))
        .await
        .unwrap();
    let view = wait_terminal(&m, id).await;
    assert_eq!(view.job.state, JobState::Completed);
    let before = view.job.clone();

    let csv = m.export(id, ReportFormat::Csv).await.unwrap();
    assert_eq!(csv.filename, format!("sast_report_{}.csv", id));
    let text = String::from_utf8(csv.body).unwrap();
    let rows: Vec<_> = text.lines().collect();
    assert_eq!(rows.len(), view.findings.len() + 1);
    assert!(rows[1..].iter().any(|r| r.starts_with("app.py,2,HIGH,PY-PICKLE,")));

    let err = m.export(id, ReportFormat::Pdf).await.unwrap_err();
    assert_eq!(err.kind(), "NotImplemented");

    let after = m.status(id).await.unwrap().job;
    assert_eq!(after.report_downloads, 1);
    assert!(after.last_report_at.is_some());
    assert_eq!(after.state, before.state);
    assert_eq!(after.summary, before.summary);
    assert_eq!(after.completed_at, before.completed_at);
}

#[tokio::test]
async fn concurrent_exports_count_every_download() {
    let ws = tempfile::tempdir().unwrap();
    let m = JobManager::new(config(ws.path()), Arc::new(MemoryJobStore::new())).unwrap();

    let id = m
        .submit(upload(zip_archive(&[("app.py", "x = eval(y)\n")])))
        .await
        .unwrap();
    wait_terminal(&m, id).await;

    let mut handles = Vec::new();
    for _ in 0..12 {
        let m = m.clone();
        handles.push(tokio::spawn(async move { m.export(id, ReportFormat::Json).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(m.status(id).await.unwrap().job.report_downloads, 12);
}
