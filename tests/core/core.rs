use serde_json::json;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use taskvault::core::dependency::DependencyManager;
use taskvault::core::error::VaultError;
use taskvault::core::filesystem::{FilesystemManager, IntegrityFailure, ReadOutcome};
use taskvault::core::integrity::IntegrityManager;
use taskvault::core::journal::JournalManager;
use taskvault::core::locks::InitiativeLocks;
use taskvault::core::model::{
    DependencyContract, Initiative, InitiativeStatus, JournalIntent, JournalStatus,
    RelationshipKind, RiskAnnotation, RiskLevel, Sla, Subtask, Task, TaskPriority, TaskSignals,
    TaskStatus,
};
use taskvault::core::time::parse_timestamp;
use tempfile::tempdir;

const SECRET: &str = "core-test-secret";

fn fs_manager(root: &std::path::Path) -> FilesystemManager {
    FilesystemManager::new(root, IntegrityManager::new(SECRET).expect("integrity"))
}

fn sample_initiative(id: &str) -> Initiative {
    let mut initiative = Initiative::new(id, "Platform hardening", "ops");
    initiative.status = InitiativeStatus::Active;
    initiative
        .metadata
        .insert("quarter".into(), json!("2024-Q1"));
    initiative
}

fn sample_task(initiative_id: &str, id: &str) -> Task {
    let mut task = Task::new(id, initiative_id, "Rotate signing keys");
    task.description = "Quarterly rotation".into();
    task.priority = TaskPriority::High;
    task.status = TaskStatus::InProgress;
    task.parent_task_id = Some("parent-1".into());
    task.dependencies = vec!["T0".into()];
    task.due_date = Some(parse_timestamp("2024-03-01").unwrap());
    task.subtasks.push(Subtask {
        id: "s1".into(),
        title: "Generate key".into(),
        completed: true,
        created_at: parse_timestamp("2024-01-01").unwrap(),
    });
    task.metadata.insert("estimate".into(), json!(3));
    task.signals = TaskSignals {
        governance_state: Some("approved".into()),
        visual_priority: Some("red".into()),
        ai_signals: vec!["security".into(), "recurring".into()],
    };
    task
}

fn sample_contracts() -> Vec<DependencyContract> {
    let mut with_sla = DependencyContract::new("T1", "T2", RelationshipKind::Blocks);
    with_sla.sla = Some(Sla {
        target_date: parse_timestamp("2024-02-01").unwrap(),
        tolerance_hours: 48,
    });
    with_sla.risk = Some(RiskAnnotation {
        level: RiskLevel::High,
        note: Some("vendor lead time".into()),
    });
    vec![
        with_sla,
        DependencyContract::new("T1", "T2", RelationshipKind::Follows),
        DependencyContract::new("T2", "T3", RelationshipKind::DependsOn),
    ]
}

#[test]
fn ensure_initiative_directory_is_idempotent_and_private() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());

    let dir = fsm.ensure_initiative_directory("I1").expect("first");
    fsm.ensure_initiative_directory("I1").expect("second");
    assert!(dir.join("tasks").is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    assert!(matches!(
        fsm.ensure_initiative_directory("../escape"),
        Err(VaultError::InvalidId(_))
    ));
}

#[test]
fn documents_round_trip() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());

    let initiative = sample_initiative("I1");
    let task = sample_task("I1", "T1");
    let contracts = sample_contracts();

    fsm.write_initiative(&initiative).expect("write initiative");
    fsm.write_task(&task).expect("write task");
    fsm.write_dependencies("I1", &contracts).expect("write deps");

    assert_eq!(fsm.read_initiative("I1"), ReadOutcome::Found(initiative));
    assert_eq!(fsm.read_task("I1", "T1"), ReadOutcome::Found(task));
    assert_eq!(fsm.read_dependencies("I1"), ReadOutcome::Found(contracts));

    let root = tmp.path().join("I1");
    for name in ["manifest.json.sig", "tasks/T1.json.sig", "dependencies.json.sig"] {
        assert!(root.join(name).is_file(), "{name} missing");
    }
}

#[test]
fn on_disk_documents_use_camel_case_and_kebab_enums() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    let mut initiative = sample_initiative("I1");
    initiative.status = InitiativeStatus::OnHold;
    fsm.write_initiative(&initiative).unwrap();

    let raw = fs::read_to_string(tmp.path().join("I1/manifest.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["status"], "on-hold");
    assert_eq!(value["schemaVersion"], 1);
    assert!(raw.contains('\n'), "documents are pretty-printed");

    let sig = fs::read_to_string(tmp.path().join("I1/manifest.json.sig")).unwrap();
    assert_eq!(sig.len(), 64);
    assert!(!sig.ends_with('\n'));
}

#[test]
fn flipped_byte_is_reported_as_integrity_violation() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    fsm.write_initiative(&sample_initiative("I1")).unwrap();
    fsm.write_task(&sample_task("I1", "T1")).unwrap();

    let path = tmp.path().join("I1/tasks/T1.json");
    let mut bytes = fs::read(&path).unwrap();
    let pos = bytes.iter().position(|b| *b == b'R').expect("title byte");
    bytes[pos] = b'r';
    fs::write(&path, bytes).unwrap();

    let outcome = fsm.read_task("I1", "T1");
    assert_eq!(
        outcome,
        ReadOutcome::IntegrityViolation(IntegrityFailure::SignatureMismatch)
    );
    assert!(outcome.found().is_none());
}

#[test]
fn swapped_sidecar_fails_verification() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    fsm.write_initiative(&sample_initiative("I1")).unwrap();
    fsm.write_task(&sample_task("I1", "T1")).unwrap();
    fsm.write_task(&sample_task("I1", "T2")).unwrap();

    let tasks = tmp.path().join("I1/tasks");
    fs::copy(tasks.join("T1.json.sig"), tasks.join("T2.json.sig")).unwrap();

    assert!(fsm.read_task("I1", "T1").is_found());
    assert!(fsm.read_task("I1", "T2").is_integrity_violation());
}

#[test]
fn missing_content_is_not_found_and_missing_sidecar_is_violation() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    assert_eq!(fsm.read_task("I1", "nope"), ReadOutcome::NotFound);
    assert_eq!(fsm.read_initiative("I1"), ReadOutcome::NotFound);
    assert_eq!(fsm.read_dependencies("I1"), ReadOutcome::NotFound);

    fsm.write_task(&sample_task("I1", "T1")).unwrap();
    fs::remove_file(tmp.path().join("I1/tasks/T1.json.sig")).unwrap();
    assert_eq!(
        fsm.read_task("I1", "T1"),
        ReadOutcome::IntegrityViolation(IntegrityFailure::MissingSignature)
    );
}

#[test]
fn signed_but_malformed_content_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    let integrity = IntegrityManager::new(SECRET).unwrap();
    fsm.ensure_initiative_directory("I1").unwrap();

    let path = tmp.path().join("I1/manifest.json");
    let garbage = b"{ not json";
    fs::write(&path, garbage).unwrap();
    fs::write(tmp.path().join("I1/manifest.json.sig"), integrity.sign(garbage)).unwrap();

    assert!(matches!(
        fsm.read_initiative("I1"),
        ReadOutcome::IntegrityViolation(IntegrityFailure::Malformed(_))
    ));
}

#[test]
fn task_copied_into_another_initiative_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    fsm.write_task(&sample_task("X", "T1")).unwrap();
    fsm.ensure_initiative_directory("Y").unwrap();

    // A validly signed file moved under the wrong initiative.
    for suffix in ["", ".sig"] {
        fs::copy(
            tmp.path().join(format!("X/tasks/T1.json{suffix}")),
            tmp.path().join(format!("Y/tasks/T1.json{suffix}")),
        )
        .unwrap();
    }
    assert_eq!(
        fsm.read_task("Y", "T1"),
        ReadOutcome::IntegrityViolation(IntegrityFailure::OwnershipMismatch {
            expected: "Y".into(),
            found: "X".into(),
        })
    );
}

#[test]
fn listing_is_isolated_per_initiative_and_skips_hidden() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    fsm.write_task(&sample_task("X", "T1")).unwrap();
    fsm.write_task(&sample_task("X", "T2")).unwrap();
    fsm.write_task(&sample_task("Y", "T9")).unwrap();
    fs::create_dir_all(tmp.path().join(".trash")).unwrap();
    fs::write(tmp.path().join("stray-file"), "x").unwrap();

    assert_eq!(fsm.list_initiatives().unwrap(), vec!["X", "Y"]);
    assert_eq!(fsm.list_tasks("X").unwrap(), vec!["T1", "T2"]);
    assert_eq!(fsm.list_tasks("Y").unwrap(), vec!["T9"]);
    assert!(fsm.list_tasks("Z").unwrap().is_empty());
}

#[test]
fn listing_missing_root_is_empty() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(&tmp.path().join("not-created"));
    assert!(fsm.list_initiatives().unwrap().is_empty());
}

#[test]
fn verify_initiative_reports_each_bad_file() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    fsm.write_initiative(&sample_initiative("I1")).unwrap();
    fsm.write_task(&sample_task("I1", "T1")).unwrap();
    fsm.write_task(&sample_task("I1", "T2")).unwrap();
    fsm.write_dependencies("I1", &sample_contracts()).unwrap();

    let clean = fsm.verify_initiative("I1").unwrap();
    assert!(clean.is_clean());
    assert_eq!(clean.checked, 4);

    fs::write(tmp.path().join("I1/tasks/T2.json"), "{}").unwrap();
    let dirty = fsm.verify_initiative("I1").unwrap();
    assert_eq!(dirty.violations.len(), 1);
    assert_eq!(dirty.violations[0].path, "I1/tasks/T2.json");
}

#[test]
fn concurrent_writes_to_one_task_never_leave_a_mismatched_sidecar() {
    let tmp = tempdir().expect("tempdir");
    let fsm = Arc::new(fs_manager(tmp.path()));
    fsm.write_task(&sample_task("I1", "T1")).unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let fsm = Arc::clone(&fsm);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut task = sample_task("I1", "T1");
                task.title = format!("version {i}");
                barrier.wait();
                for _ in 0..10 {
                    fsm.write_task(&task).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(fsm.read_task("I1", "T1").is_found());
}

#[test]
fn journal_append_replay_and_complete() {
    let tmp = tempdir().expect("tempdir");
    let journal = JournalManager::new(tmp.path());

    let e = journal
        .append(
            "I1",
            JournalIntent::new("task.write", json!({"taskId": "T1"})).with_request_id(Some("req-7")),
        )
        .expect("append");
    assert_eq!(e.status, JournalStatus::Pending);
    assert_eq!(e.request_id.as_deref(), Some("req-7"));

    assert!(journal.mark_complete("I1", &e.id).unwrap());
    // Re-applying is a no-op.
    assert!(!journal.mark_complete("I1", &e.id).unwrap());

    let replay = journal.replay("I1").unwrap();
    assert_eq!(replay.entries.len(), 1);
    assert_eq!(replay.entries[0].id, e.id);
    assert_eq!(replay.entries[0].status, JournalStatus::Completed);
    assert!(replay.malformed.is_empty());
}

#[test]
fn journal_preserves_order_and_append_only_lines() {
    let tmp = tempdir().expect("tempdir");
    let journal = JournalManager::new(tmp.path());
    let ids: Vec<String> = (0..5)
        .map(|i| {
            journal
                .append("I1", JournalIntent::new("op", json!({ "n": i })))
                .unwrap()
                .id
        })
        .collect();

    let path = journal.journal_path("I1").unwrap();
    let before = fs::read_to_string(&path).unwrap();
    assert_eq!(before.lines().count(), 5);

    journal.mark_failed("I1", &ids[2]).unwrap();
    let after = fs::read_to_string(&path).unwrap();
    assert_eq!(after.lines().count(), 5);
    for (i, (old, new)) in before.lines().zip(after.lines()).enumerate() {
        if i == 2 {
            assert!(new.contains("\"status\":\"failed\""));
        } else {
            assert_eq!(old, new);
        }
    }

    let replayed: Vec<String> = journal
        .replay("I1")
        .unwrap()
        .entries
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(replayed, ids);
    assert_eq!(journal.pending("I1").unwrap().len(), 4);
    assert!(!tmp.path().join("I1/.journal.jsonl.tmp").exists());
}

#[test]
fn journal_terminal_states_are_final() {
    let tmp = tempdir().expect("tempdir");
    let journal = JournalManager::new(tmp.path());
    let e = journal.append("I1", JournalIntent::new("op", json!({}))).unwrap();
    journal.mark_failed("I1", &e.id).unwrap();
    assert!(matches!(
        journal.mark_complete("I1", &e.id),
        Err(VaultError::ValidationError(_))
    ));
    assert!(matches!(
        journal.mark_complete("I1", "missing-id"),
        Err(VaultError::NotFound(_))
    ));
}

#[test]
fn journal_collects_malformed_lines_and_keeps_them_on_rewrite() {
    let tmp = tempdir().expect("tempdir");
    let journal = JournalManager::new(tmp.path());
    let e = journal.append("I1", JournalIntent::new("op", json!({}))).unwrap();

    let path = journal.journal_path("I1").unwrap();
    let mut content = fs::read_to_string(&path).unwrap();
    content.push_str("{\"truncated\": \n");
    fs::write(&path, content).unwrap();

    let replay = journal.replay("I1").unwrap();
    assert_eq!(replay.entries.len(), 1);
    assert_eq!(replay.malformed.len(), 1);
    assert_eq!(replay.malformed[0].line_number, 2);

    journal.mark_complete("I1", &e.id).unwrap();
    let rewritten = fs::read_to_string(&path).unwrap();
    assert!(rewritten.contains("{\"truncated\": "));
    assert_eq!(journal.replay("I1").unwrap().malformed.len(), 1);
}

#[test]
fn journal_of_unknown_initiative_is_empty() {
    let tmp = tempdir().expect("tempdir");
    let journal = JournalManager::new(tmp.path());
    let replay = journal.replay("never-written").unwrap();
    assert!(replay.entries.is_empty());
    assert!(replay.malformed.is_empty());
}

#[test]
fn shared_locks_serialize_journal_and_documents() {
    let tmp = tempdir().expect("tempdir");
    let locks = Arc::new(InitiativeLocks::new());
    let fsm = Arc::new(FilesystemManager::with_locks(
        tmp.path(),
        IntegrityManager::new(SECRET).unwrap(),
        Arc::clone(&locks),
    ));
    let journal = Arc::new(JournalManager::with_locks(tmp.path(), Arc::clone(&locks)));

    let appender = {
        let journal = Arc::clone(&journal);
        thread::spawn(move || {
            for i in 0..50 {
                let e = journal
                    .append("I1", JournalIntent::new("op", json!({ "n": i })))
                    .unwrap();
                journal.mark_complete("I1", &e.id).unwrap();
            }
        })
    };
    let writer = {
        let fsm = Arc::clone(&fsm);
        thread::spawn(move || {
            for _ in 0..50 {
                fsm.write_task(&sample_task("I1", "T1")).unwrap();
            }
        })
    };
    appender.join().unwrap();
    writer.join().unwrap();

    let replay = journal.replay("I1").unwrap();
    assert_eq!(replay.entries.len(), 50);
    assert!(replay.malformed.is_empty());
    assert!(replay.entries.iter().all(|e| e.status == JournalStatus::Completed));
    assert!(fsm.read_task("I1", "T1").is_found());
}

#[test]
fn stored_contracts_feed_the_dependency_manager() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    fsm.write_dependencies("I1", &sample_contracts()).unwrap();

    let mut manager = DependencyManager::new();
    manager.load_contracts(fsm.read_dependencies("I1").found().unwrap());
    assert_eq!(manager.contracts_between("T1", "T2").len(), 2);
    assert_eq!(manager.get_blocked_tasks("T1"), vec!["T2"]);
    assert_eq!(manager.get_dependencies("T3"), vec!["T2"]);
}

#[test]
fn sidecar_text_must_match_exactly() {
    let tmp = tempdir().expect("tempdir");
    let fsm = fs_manager(tmp.path());
    fsm.write_task(&sample_task("I1", "T1")).unwrap();

    let sig_path = tmp.path().join("I1/tasks/T1.json.sig");
    let sig = fs::read_to_string(&sig_path).unwrap();
    for variant in [format!("{sig}\n"), sig.to_uppercase()] {
        fs::write(&sig_path, &variant).unwrap();
        assert_eq!(
            fsm.read_task("I1", "T1"),
            ReadOutcome::IntegrityViolation(IntegrityFailure::SignatureMismatch)
        );
    }
    fs::write(&sig_path, &sig).unwrap();
    assert!(fsm.read_task("I1", "T1").is_found());
}
