mod test_support;

use serde_json::json;
use test_support::{days_from_today, today, Sidecar};

fn cycle_with_students(s: &mut Sidecar, codes: &[&str]) -> String {
    let cycle = s.create_cycle("Main", days_from_today(-30), days_from_today(60));
    for code in codes {
        s.create_student(code, &format!("Last{code}"), "First");
        s.enroll(code, &cycle);
    }
    cycle
}

#[test]
fn second_check_in_reports_existing_status() {
    let mut s = Sidecar::with_workspace();
    cycle_with_students(&mut s, &["S1"]);

    let first = s.request_ok("attendance.checkIn", json!({ "studentCode": "S1" }));
    assert_eq!(first["record"]["status"], "Present");
    let error = s.request_err(
        "attendance.checkIn",
        json!({ "studentCode": "S1" }),
        "conflict",
    );
    assert_eq!(error["details"]["reason"], "already_marked");
    assert_eq!(error["details"]["status"], "Present");
}

#[test]
fn check_in_needs_an_enrollment() {
    let mut s = Sidecar::with_workspace();
    s.create_student("S1", "Quispe", "Ana");
    s.request_err("attendance.checkIn", json!({ "studentCode": "S1" }), "invalid_state");
    s.request_err("attendance.checkIn", json!({ "studentCode": "S9" }), "not_found");
}

#[test]
fn late_cutoff_from_environment_marks_late() {
    let mut s = Sidecar::spawn_with_env(&[("LEDGERD_ATTENDANCE__LATE_AFTER", "00:00:00")]);
    let path = s.path("workspace");
    s.request_ok("workspace.select", json!({ "path": path }));
    cycle_with_students(&mut s, &["S1"]);
    let record = s.request_ok("attendance.checkIn", json!({ "studentCode": "S1" }));
    assert_eq!(record["record"]["status"], "Late");
}

#[test]
fn close_day_marks_only_missing_students() {
    let mut s = Sidecar::with_workspace();
    let cycle = cycle_with_students(&mut s, &["S1", "S2", "S3", "S4", "S5"]);
    s.request_ok("attendance.checkIn", json!({ "studentCode": "S2" }));
    s.request_ok("attendance.checkIn", json!({ "studentCode": "S5" }));

    let first = s.request_ok("attendance.closeDay", json!({ "cycleId": cycle }));
    assert_eq!(first["marked"], 3);
    assert_eq!(first["disabled"], false);
    assert_eq!(first["date"], today().to_string());
    let second = s.request_ok("attendance.closeDay", json!({ "cycleId": cycle }));
    assert_eq!(second["marked"], 0);

    let day = s.request_ok("attendance.listDay", json!({ "cycleId": cycle }));
    let statuses: Vec<_> = day["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["status"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(statuses, vec!["Absent", "Present", "Absent", "Absent", "Present"]);

    let history = s.request_ok("students.attendance", json!({ "code": "S1" }));
    assert_eq!(
        history["records"][0]["notes"],
        format!("Day closed {}", today())
    );
}

#[test]
fn disabled_day_is_skipped_by_closure() {
    let mut s = Sidecar::with_workspace();
    let cycle = cycle_with_students(&mut s, &["S1", "S2"]);
    let date = days_from_today(-1).to_string();

    let disabled = s.request_ok(
        "attendance.disableDay",
        json!({ "cycleId": cycle, "date": date }),
    );
    assert_eq!(disabled["disabled"], 2);
    let closed = s.request_ok(
        "attendance.closeDay",
        json!({ "cycleId": cycle, "date": date }),
    );
    assert_eq!(closed["marked"], 0);
    assert_eq!(closed["disabled"], true);

    let day = s.request_ok("attendance.listDay", json!({ "cycleId": cycle, "date": date }));
    assert_eq!(day["entries"][0]["status"], "Disabled");
}

#[test]
fn list_day_uses_no_record_sentinel() {
    let mut s = Sidecar::with_workspace();
    let cycle = cycle_with_students(&mut s, &["S1"]);
    let day = s.request_ok("attendance.listDay", json!({ "cycleId": cycle }));
    assert_eq!(day["entries"][0]["status"], "NoRecord");
    s.request_err(
        "attendance.listDay",
        json!({ "cycleId": cycle, "date": "yesterday" }),
        "bad_params",
    );
    s.request_err("attendance.closeDay", json!({ "cycleId": "missing" }), "not_found");
}
