// crates/seqrun-client/tests/runner.rs
// ============================================================================
// Module: Job Runner Tests
// Description: End-to-end runs against an in-memory job service.
// Purpose: Exercise serial, parallel, detached, failing, and cancelled runs.
// Dependencies: seqrun-client, seqrun-core, tempfile
// ============================================================================
//! ## Overview
//! Drives the full client through the scripted [`common::FakeService`].

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use common::Behavior;
use common::ECHO_OUTPUT;
use common::ECHO_TOOL;
use common::FakeService;
use common::client_for;
use common::echo_tool;
use common::fast_settings;
use common::fastq_records;
use common::paired_echo_tool;
use common::registry_with;
use seqrun_client::RunOutcome;
use seqrun_client::RunRequest;
use seqrun_core::CancellationToken;
use seqrun_core::JobError;
use seqrun_core::RemoteJobId;
use seqrun_core::RemoteStatus;
use seqrun_core::ValidationError;
use tempfile::tempdir;

// ============================================================================
// SECTION: Serial Runs
// ============================================================================

#[test]
fn serial_run_uploads_polls_and_downloads() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "payload bytes\n").unwrap();
    let service = FakeService::new(Behavior {
        polls_before_ready: 2,
        ..Behavior::default()
    });
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(&dir.path().join("work")),
    );
    let out = dir.path().join("out");
    let request = RunRequest::new(ECHO_TOOL, input.as_path())
        .output_dir(&out)
        .args("--fast");

    let outcome = client.run(&request, &CancellationToken::new()).unwrap();

    let RunOutcome::Completed(handle) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(handle.job_id(), Some(&RemoteJobId::new("job-1")));
    assert_eq!(handle.local_paths(), &[out.join(ECHO_OUTPUT)]);
    assert_eq!(fs::read_to_string(out.join(ECHO_OUTPUT)).unwrap(), "payload bytes\n");

    let job = service.job("job-1");
    let created = job.request.unwrap();
    assert_eq!(created.tool_name, ECHO_TOOL);
    assert_eq!(created.tool_args, "--fast");
    assert_eq!(created.output_file_name, ECHO_OUTPUT);
    assert_eq!(job.inputs.len(), 1);
    assert_eq!(job.inputs[0].file_name, "sample.txt");
    assert_eq!(
        job.statuses,
        vec![
            RemoteStatus::TransferringFromClient,
            RemoteStatus::TransferredFromClient,
            RemoteStatus::TransferringToClient,
            RemoteStatus::TransferredToClient,
        ]
    );
    assert_eq!(events.named("execution_mode")[0].message.as_deref(), Some("serial"));
    assert_eq!(events.named("run_complete").len(), 1);
    assert!(events.named("remote_marked_failed").is_empty());
}

#[test]
fn unknown_tool_is_rejected_before_any_job() {
    let dir = tempdir().unwrap();
    let service = FakeService::new(Behavior::default());
    let (client, _) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let err = client
        .run(&RunRequest::new("nope", dir.path()), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err, JobError::Validation(ValidationError::UnknownTool("nope".to_string())));
    assert!(service.jobs().is_empty());
}

#[test]
fn blacklisted_arguments_are_rejected_before_any_job() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "x\n").unwrap();
    let service = FakeService::new(Behavior::default());
    let (client, _) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let request = RunRequest::new(ECHO_TOOL, input.as_path()).args("--fast -o");
    let err = client.run(&request, &CancellationToken::new()).unwrap_err();
    assert_eq!(
        err,
        JobError::Validation(ValidationError::Arguments {
            unknown: Vec::new(),
            blacklisted: vec!["-o".to_string()],
        })
    );
    assert!(service.jobs().is_empty());
}

#[test]
fn rejected_key_stops_before_job_creation() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "x\n").unwrap();
    let service = FakeService::new(Behavior {
        reject_key: true,
        ..Behavior::default()
    });
    let (client, _) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let err = client
        .run(&RunRequest::new(ECHO_TOOL, input.as_path()), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, JobError::RemoteAccess(_)), "{err:?}");
    assert!(service.jobs().is_empty());
}

#[test]
fn upload_failure_marks_the_remote_job_failed() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "x\n").unwrap();
    let service = FakeService::new(Behavior {
        fail_upload: Some("sample".to_string()),
        ..Behavior::default()
    });
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let err = client
        .run(&RunRequest::new(ECHO_TOOL, input.as_path()), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, JobError::Upload { ref job_id, .. } if job_id == "job-1"), "{err:?}");
    assert_eq!(service.job("job-1").statuses.last(), Some(&RemoteStatus::Failed));
    assert_eq!(events.named("run_failed").len(), 1);
}

#[test]
fn dangerous_arguments_force_serial_execution() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("reads.fastq");
    fs::write(&input, fastq_records(4)).unwrap();
    let service = FakeService::new(Behavior::default());
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(true, 32)),
        fast_settings(&dir.path().join("work")),
    );
    let out = dir.path().join("out");
    let request = RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(&out).args("--keep-temp 1");

    let outcome = client.run(&request, &CancellationToken::new()).unwrap();

    let RunOutcome::Completed(handle) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(service.jobs().len(), 1);
    let created = service.job("job-1").request.unwrap();
    assert_eq!(created.tool_args, "--keep-temp 1");
    assert_eq!(created.output_file_name, "echo_output.tar.gz");
    assert_eq!(handle.local_paths(), &[out.join(ECHO_OUTPUT)]);
    assert!(!out.join("echo_output.tar.gz").exists());
    assert_eq!(events.named("arguments_downgraded").len(), 1);
    assert_eq!(events.named("execution_mode")[0].message.as_deref(), Some("serial"));
}

#[test]
fn compressed_outputs_are_unpacked_regardless_of_name() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "bundled\n").unwrap();
    let service = FakeService::new(Behavior {
        compressed_output: Some("echo_bundle".to_string()),
        ..Behavior::default()
    });
    let (client, _) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let out = dir.path().join("out");

    let outcome = client
        .run(&RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(&out), &CancellationToken::new())
        .unwrap();

    let RunOutcome::Completed(handle) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(handle.local_paths(), &[out.join(ECHO_OUTPUT)]);
    assert_eq!(fs::read_to_string(out.join(ECHO_OUTPUT)).unwrap(), "bundled\n");
    assert!(!out.join("echo_bundle").exists());
}

// ============================================================================
// SECTION: Parallel Runs
// ============================================================================

#[test]
fn parallel_run_merges_chunk_outputs_in_order() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("reads.fastq");
    let content = fastq_records(6);
    fs::write(&input, &content).unwrap();
    let work = dir.path().join("work");
    let service = FakeService::new(Behavior {
        polls_before_ready: 1,
        ..Behavior::default()
    });
    let (client, events) =
        client_for(&service, registry_with(echo_tool(true, 32)), fast_settings(&work));
    let out = dir.path().join("out");

    let outcome = client
        .run(&RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(&out), &CancellationToken::new())
        .unwrap();

    let RunOutcome::Merged {
        outputs,
        job_ids,
    } = outcome
    else {
        panic!("expected a merged run, got {outcome:?}");
    };
    assert_eq!(outputs, vec![out.join(ECHO_OUTPUT)]);
    assert_eq!(job_ids.len(), 3);
    assert_eq!(fs::read_to_string(out.join(ECHO_OUTPUT)).unwrap(), content);
    assert_eq!(events.named("execution_mode")[0].message.as_deref(), Some("parallel"));
    assert_eq!(events.named("worker_spawned").len(), 3);
    assert_eq!(events.named("outputs_merged").len(), 1);
    let leftovers: Vec<_> = fs::read_dir(&work).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch files left behind: {leftovers:?}");
}

#[test]
fn paired_parallel_run_keeps_chunks_aligned_and_tagged() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("r_1.fastq");
    let right = dir.path().join("r_2.fastq");
    let forward = fastq_records(3);
    let reverse = forward.replace("ACGT", "TTTT");
    fs::write(&left, &forward).unwrap();
    fs::write(&right, &reverse).unwrap();
    let work = dir.path().join("work");
    let service = FakeService::new(Behavior::default());
    let (client, _) = client_for(&service, registry_with(paired_echo_tool(16)), fast_settings(&work));
    let out = dir.path().join("out");
    let request =
        RunRequest::new(ECHO_TOOL, vec![left.as_path(), right.as_path()]).output_dir(&out);

    let outcome = client.run(&request, &CancellationToken::new()).unwrap();

    assert!(matches!(outcome, RunOutcome::Merged { ref job_ids, .. } if job_ids.len() == 3));
    let mut chunks = BTreeSet::new();
    for job in service.jobs().values() {
        assert_eq!(job.inputs.len(), 2);
        let tags: Vec<(Option<&str>, Option<usize>)> = job
            .inputs
            .iter()
            .map(|input| (input.tool_prefix.as_deref(), input.tool_prefix_order))
            .collect();
        assert_eq!(tags, vec![(Some("-1"), Some(0)), (Some("-2"), Some(1))]);
        let first = &job.inputs[0].file_name;
        let second = &job.inputs[1].file_name;
        assert!(first.starts_with("seqrun_split_r_1.p0.chunk"), "{first}");
        assert!(second.starts_with("seqrun_split_r_2.p1.chunk"), "{second}");
        let index = first.rsplit("chunk").next().unwrap().to_string();
        assert_eq!(second.rsplit("chunk").next().unwrap(), index);
        chunks.insert(index);
    }
    assert_eq!(chunks.len(), 3);

    let forward_records: Vec<&str> = forward.split_inclusive("IIII\n").collect();
    let reverse_records: Vec<&str> = reverse.split_inclusive("IIII\n").collect();
    let expected: String = forward_records
        .iter()
        .zip(&reverse_records)
        .map(|(first, second)| format!("{first}{second}"))
        .collect();
    assert_eq!(fs::read_to_string(out.join(ECHO_OUTPUT)).unwrap(), expected);
    assert_eq!(fs::read_dir(&work).unwrap().count(), 0);
}

#[test]
fn mismatched_pair_fails_without_leaving_chunks() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("a_1.fastq");
    let right = dir.path().join("a_2.fastq");
    fs::write(&left, fastq_records(3)).unwrap();
    fs::write(&right, fastq_records(1)).unwrap();
    let work = dir.path().join("work");
    let service = FakeService::new(Behavior::default());
    let (client, _) = client_for(&service, registry_with(paired_echo_tool(16)), fast_settings(&work));
    let request = RunRequest::new(ECHO_TOOL, vec![left.as_path(), right.as_path()])
        .output_dir(dir.path().join("out"));

    let err = client.run(&request, &CancellationToken::new()).unwrap_err();

    assert!(
        matches!(err, JobError::Validation(ValidationError::PairedLengthMismatch(_))),
        "{err:?}"
    );
    assert!(service.jobs().is_empty());
    let leftovers: Vec<_> = fs::read_dir(&work).unwrap().collect();
    assert!(leftovers.is_empty(), "chunk files left behind: {leftovers:?}");
}

#[test]
fn failing_chunk_interrupts_every_sibling() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("reads.fastq");
    fs::write(&input, fastq_records(6)).unwrap();
    let service = FakeService::new(Behavior {
        fail_input: Some(("chunk0001".to_string(), 3)),
        polls_before_ready: usize::MAX,
        ..Behavior::default()
    });
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(true, 32)),
        fast_settings(&dir.path().join("work")),
    );

    let err = client
        .run(
            &RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(dir.path().join("out")),
            &CancellationToken::new(),
        )
        .unwrap_err();

    let JobError::WorkersFailed {
        job_ids,
        failures,
    } = err
    else {
        panic!("expected an aggregated failure, got {err:?}");
    };
    let ids: BTreeSet<String> = job_ids.into_iter().collect();
    let expected: BTreeSet<String> =
        ["job-1", "job-2", "job-3"].into_iter().map(str::to_string).collect();
    assert_eq!(ids, expected);
    assert!(failures.iter().any(|failure| failure.contains("simulated tool failure")));

    let interrupted: BTreeSet<u64> = events
        .named("worker_status")
        .into_iter()
        .filter(|event| event.status == Some("interrupting"))
        .filter_map(|event| event.worker)
        .collect();
    assert_eq!(interrupted, BTreeSet::from([1, 3]));
    assert_eq!(events.named("run_failed").len(), 3);

    // Interrupted siblings were still armed and report failure on exit.
    assert_eq!(events.named("remote_marked_failed").len(), 2);
    let marked = service
        .jobs()
        .values()
        .filter(|job| job.statuses.last() == Some(&RemoteStatus::Failed))
        .count();
    assert_eq!(marked, 2);
}

#[test]
fn detach_is_ignored_for_parallel_runs() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("reads.fastq");
    fs::write(&input, fastq_records(4)).unwrap();
    let service = FakeService::new(Behavior::default());
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(true, 32)),
        fast_settings(&dir.path().join("work")),
    );
    let request =
        RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(dir.path().join("out")).detach(true);

    let outcome = client.run(&request, &CancellationToken::new()).unwrap();

    assert!(matches!(outcome, RunOutcome::Merged { .. }), "{outcome:?}");
    assert_eq!(events.named("async_disabled").len(), 1);
}

// ============================================================================
// SECTION: Detach and Manual Download
// ============================================================================

#[test]
fn detached_run_can_be_downloaded_later() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "detached\n").unwrap();
    let service = FakeService::new(Behavior {
        polls_before_ready: usize::MAX,
        ..Behavior::default()
    });
    let (client, _) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let request = RunRequest::new(ECHO_TOOL, input.as_path()).detach(true);

    let outcome = client.run(&request, &CancellationToken::new()).unwrap();

    let RunOutcome::Submitted(handle) = outcome else {
        panic!("expected a submitted run, got {outcome:?}");
    };
    let job_id = handle.job_id().cloned().unwrap();
    assert_eq!(
        service.job(job_id.as_str()).statuses.last(),
        Some(&RemoteStatus::TransferredFromClient)
    );
    assert!(handle.local_paths().is_empty());

    let out = dir.path().join("later");
    let err = client.download(&job_id, &out, &[]).unwrap_err();
    assert!(matches!(err, JobError::RemoteJob { .. }), "{err:?}");

    service.make_ready(job_id.as_str());
    let handle = client.download(&job_id, &out, &[ECHO_OUTPUT.to_string()]).unwrap();
    assert_eq!(fs::read_to_string(out.join(ECHO_OUTPUT)).unwrap(), "detached\n");
    assert_eq!(handle.local_paths(), &[out.join(ECHO_OUTPUT)]);
    assert_eq!(
        service.job(job_id.as_str()).statuses.last(),
        Some(&RemoteStatus::TransferredToClient)
    );
}

#[test]
fn status_reports_remote_state() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "x\n").unwrap();
    let service = FakeService::new(Behavior::default());
    let (client, _) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    client
        .run(
            &RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(dir.path().join("out")),
            &CancellationToken::new(),
        )
        .unwrap();
    let status = client.status(&RemoteJobId::new("job-1")).unwrap();
    assert_eq!(status.status, RemoteStatus::TransferredToClient);
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

#[test]
fn cancelled_token_prevents_any_job() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "x\n").unwrap();
    let service = FakeService::new(Behavior::default());
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let token = CancellationToken::new();
    token.cancel();

    let err = client.run(&RunRequest::new(ECHO_TOOL, input.as_path()), &token).unwrap_err();

    assert!(err.is_interrupted(), "{err:?}");
    assert!(service.jobs().is_empty());
    assert_eq!(events.named("run_interrupted").len(), 1);
}

#[test]
fn cancellation_mid_run_marks_the_remote_job_failed() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "x\n").unwrap();
    let service = FakeService::new(Behavior {
        polls_before_ready: usize::MAX,
        ..Behavior::default()
    });
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        let service = Arc::clone(&service);
        thread::spawn(move || {
            while service.jobs().values().all(|job| {
                job.statuses.last() != Some(&RemoteStatus::TransferredFromClient)
            }) {
                thread::sleep(Duration::from_millis(5));
            }
            token.cancel();
        })
    };

    let err = client
        .run(
            &RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(dir.path().join("out")),
            &token,
        )
        .unwrap_err();
    canceller.join().unwrap();

    assert!(err.is_interrupted(), "{err:?}");
    assert_eq!(service.job("job-1").statuses.last(), Some(&RemoteStatus::Failed));
    assert_eq!(events.named("remote_marked_failed").len(), 1);
}

#[test]
fn second_interrupt_returns_without_waiting_for_workers() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "x\n").unwrap();
    let stall = Duration::from_secs(3);
    let service = FakeService::new(Behavior {
        stall_status: Some(stall),
        ..Behavior::default()
    });
    let (client, events) = client_for(
        &service,
        registry_with(echo_tool(false, 1024)),
        fast_settings(dir.path()),
    );
    let token = CancellationToken::new();
    let signaller = {
        let token = token.clone();
        let service = Arc::clone(&service);
        thread::spawn(move || {
            while service.jobs().values().all(|job| {
                job.statuses.last() != Some(&RemoteStatus::TransferredFromClient)
            }) {
                thread::sleep(Duration::from_millis(5));
            }
            // Let the worker enter the stalled status call.
            thread::sleep(Duration::from_millis(50));
            token.cancel();
            token.escalate();
            Instant::now()
        })
    };

    let err = client
        .run(
            &RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(dir.path().join("out")),
            &token,
        )
        .unwrap_err();
    let returned = Instant::now();
    let signalled = signaller.join().unwrap();

    assert!(
        matches!(&err, JobError::Interrupted(message) if message.contains("second interrupt")),
        "{err:?}"
    );
    assert!(returned.duration_since(signalled) < stall / 2);
    assert_eq!(events.named("run_interrupted").len(), 1);
    let failed = events.named("run_failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_id.as_ref().map(RemoteJobId::as_str), Some("job-1"));
}
