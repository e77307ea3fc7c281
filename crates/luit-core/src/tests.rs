//! End-to-end engine tests against `MemoryStore`.

use std::{
  collections::HashSet,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::{
  Error, Tracker,
  assignment::{Assignment, AssignmentStatus, NewLabDocument},
  clock::ManualClock,
  config::{EngineConfig, EscalationPolicy},
  error::Guard,
  geo::{Coordinates, EARTH_RADIUS_KM, haversine_km},
  listings::ReportFilter,
  locality::{LocalityKey, PinDirectory},
  memory::MemoryStore,
  proximity::Contamination,
  report::{NewLabFindings, NewReport, Report, ReportStatus, Severity, SourceType},
  role::{Caller, Role, RoleResolver, StaticRoleResolver},
  store::{
    AssignmentPatch, AssignmentStore, ReportField, ReportPatch, ReportStore, StoreError,
  },
};

type TestTracker = Tracker<MemoryStore, StaticRoleResolver>;

const PIN: &str = "781001";

fn centre() -> Coordinates { Coordinates::new(26.18, 91.75).unwrap() }

/// A point `km` due north of `from`.
fn north_of(from: Coordinates, km: f64) -> Coordinates {
  Coordinates::new(from.latitude + (km / EARTH_RADIUS_KM).to_degrees(), from.longitude)
    .unwrap()
}

fn roles() -> StaticRoleResolver {
  StaticRoleResolver::new()
    .with("phc", Caller::new(Role::Phc, "Kamrup Metropolitan"))
    .with("lab", Caller::new(Role::Lab, "Kamrup Metropolitan"))
}

fn tracker(config: EngineConfig) -> Arc<TestTracker> {
  let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
  Arc::new(
    Tracker::new(MemoryStore::new(), roles(), config)
      .unwrap()
      .with_clock(Arc::new(clock)),
  )
}

fn with_quorum(quorum: usize) -> EngineConfig { EngineConfig { quorum, ..EngineConfig::default() } }

fn keyed(problem: &str) -> NewReport {
  NewReport::new(problem, SourceType::Pond, Severity::Medium)
    .at(centre())
    .pin(PIN)
    .in_district("Kamrup Metropolitan")
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn quorum_forms_one_assignment_and_escalates_members() {
  let t = tracker(EngineConfig::default());

  let mut ids = Vec::new();
  for i in 0..4 {
    let s = t.lifecycle().submit("", keyed(&format!("report {i}"))).await.unwrap();
    assert!(s.assignment.is_none());
    assert_eq!(s.report.status, ReportStatus::Reported);
    ids.push(s.report.report_id);
  }
  assert!(t.listings().list_assignments(None).await.unwrap().is_empty());

  let fifth = t.lifecycle().submit("", keyed("report 4")).await.unwrap();
  ids.push(fifth.report.report_id);
  let assignment = fifth.assignment.expect("quorum reached");
  assert_eq!(assignment.member_report_ids.len(), 5);
  assert_eq!(assignment.status, AssignmentStatus::PendingLabVisit);
  assert_eq!(assignment.locality_key.as_str(), PIN);
  assert_eq!(fifth.report.status, ReportStatus::Escalated);

  for id in ids {
    let r = t.listings().get_report(id).await.unwrap();
    assert_eq!(r.status, ReportStatus::Escalated);
    assert_eq!(r.assignment_id, Some(assignment.assignment_id));
  }
  assert_eq!(t.listings().list_assignments(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn late_reports_join_the_open_assignment() {
  let t = tracker(with_quorum(2));
  t.lifecycle().submit("", keyed("a")).await.unwrap();
  let formed = t.lifecycle().submit("", keyed("b")).await.unwrap().assignment.unwrap();

  let late = t.lifecycle().submit("", keyed("c")).await.unwrap();
  let joined = late.assignment.unwrap();
  assert_eq!(joined.assignment_id, formed.assignment_id);
  assert_eq!(joined.member_report_ids.len(), 3);
  assert_eq!(late.report.status, ReportStatus::Escalated);
  // Computed once at formation.
  assert_eq!(joined.representative_location, formed.representative_location);
}

#[tokio::test]
async fn assignment_takes_the_highest_member_severity() {
  let t = tracker(with_quorum(2));
  let mut high = keyed("sewage inflow");
  high.severity = Severity::High;
  t.lifecycle().submit("", high).await.unwrap();
  let low = NewReport { severity: Severity::Low, ..keyed("slight smell") };
  let a = t.lifecycle().submit("", low).await.unwrap().assignment.unwrap();
  assert_eq!(a.severity, Severity::High);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_form_a_single_assignment() {
  let t = tracker(EngineConfig::default());

  let tasks: Vec<_> = (0..12)
    .map(|i| {
      let t = t.clone();
      tokio::spawn(async move { t.lifecycle().submit("", keyed(&format!("r{i}"))).await })
    })
    .collect();
  let mut ids = Vec::new();
  for task in tasks {
    ids.push(task.await.unwrap().unwrap().report.report_id);
  }

  let assignments = t.listings().list_assignments(None).await.unwrap();
  assert_eq!(assignments.len(), 1);
  let members: HashSet<Uuid> = assignments[0].member_report_ids.iter().copied().collect();
  assert_eq!(members.len(), assignments[0].member_report_ids.len());
  assert_eq!(members.len(), 12);
  for id in ids {
    let r = t.listings().get_report(id).await.unwrap();
    assert_eq!(r.status, ReportStatus::Escalated);
    assert!(members.contains(&id));
  }
}

#[tokio::test]
async fn pin_is_derived_from_the_directory() {
  let directory: PinDirectory = [(LocalityKey::parse(PIN).unwrap(), centre())].into_iter().collect();
  let t = Tracker::new(MemoryStore::new(), roles(), with_quorum(1))
    .unwrap()
    .with_directory(Arc::new(directory));

  let new = NewReport::new("green water", SourceType::Lake, Severity::Low).at(north_of(centre(), 2.0));
  let s = t.lifecycle().submit("", new).await.unwrap();
  assert_eq!(s.report.locality_key.as_ref().map(LocalityKey::as_str), Some(PIN));
  assert!(s.assignment.is_some());
}

#[tokio::test]
async fn reports_without_location_never_escalate() {
  let t = tracker(with_quorum(1));
  let new = NewReport::new("odd taste", SourceType::Well, Severity::Low).pin(PIN);
  let s = t.lifecycle().submit("", new).await.unwrap();
  assert!(s.assignment.is_none());
  assert_eq!(s.report.status, ReportStatus::Reported);

  let err = t.lifecycle().escalate("phc", s.report.report_id).await.unwrap_err();
  assert_eq!(err.guard(), Some(&Guard::MissingField { field: "location" }));
}

#[tokio::test]
async fn manual_escalation_below_quorum_is_rejected() {
  let t = tracker(EngineConfig {
    quorum: 3,
    escalation: EscalationPolicy::PhcConfirmed,
    ..EngineConfig::default()
  });
  let a = t.lifecycle().submit("", keyed("a")).await.unwrap();
  t.lifecycle().submit("", keyed("b")).await.unwrap();

  let err = t.lifecycle().escalate("phc", a.report.report_id).await.unwrap_err();
  assert!(matches!(err.guard(), Some(Guard::Precondition { .. })));

  t.lifecycle().submit("", keyed("c")).await.unwrap();
  let escalated = t.lifecycle().escalate("phc", a.report.report_id).await.unwrap();
  assert_eq!(escalated.status, ReportStatus::Escalated);
  let all = t.listings().list_reports(ReportFilter::default()).await.unwrap();
  assert!(all.iter().all(|r| r.status == ReportStatus::Escalated));
}

#[tokio::test]
async fn public_callers_cannot_escalate() {
  let t = tracker(EngineConfig { escalation: EscalationPolicy::PhcConfirmed, ..with_quorum(1) });
  let s = t.lifecycle().submit("", keyed("a")).await.unwrap();
  let err = t.lifecycle().escalate("stranger", s.report.report_id).await.unwrap_err();
  assert_eq!(err.guard(), Some(&Guard::Role { required: Role::Phc, actual: Role::Public }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_escalations_succeed_exactly_once() {
  let t = tracker(EngineConfig { escalation: EscalationPolicy::PhcConfirmed, ..with_quorum(1) });
  let id = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;

  let first = tokio::spawn({
    let t = t.clone();
    async move { t.lifecycle().escalate("phc", id).await }
  });
  let second = tokio::spawn({
    let t = t.clone();
    async move { t.lifecycle().escalate("phc", id).await }
  });
  let results = [first.await.unwrap(), second.await.unwrap()];

  assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
  let failure = results.into_iter().find_map(Result::err).unwrap();
  assert!(matches!(failure, Error::Conflict { .. } | Error::InvalidTransition { .. }));

  let assignments = t.listings().list_assignments(None).await.unwrap();
  assert_eq!(assignments.len(), 1);
  assert_eq!(assignments[0].member_report_ids, vec![id]);
  let r = t.listings().get_report(id).await.unwrap();
  assert_eq!(r.status, ReportStatus::Escalated);
}

// ─── Report lifecycle ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upvotes_are_all_counted() {
  let t = tracker(EngineConfig::default());
  let id = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;

  t.lifecycle().upvote("", id).await.unwrap();
  let twice = t.lifecycle().upvote("", id).await.unwrap();
  assert_eq!(twice.upvote_count, 2);

  let tasks: Vec<_> = (0..50)
    .map(|_| {
      let t = t.clone();
      tokio::spawn(async move { t.lifecycle().upvote("", id).await })
    })
    .collect();
  for task in tasks {
    task.await.unwrap().unwrap();
  }
  assert_eq!(t.listings().get_report(id).await.unwrap().upvote_count, 52);
}

#[tokio::test]
async fn lab_approval_closes_the_report() {
  let t = tracker(with_quorum(1));
  let id = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;

  let err = t.lifecycle().lab_approve_clean("lab", id).await.unwrap_err();
  assert!(matches!(err.guard(), Some(Guard::Precondition { .. })));

  let marked = t.lifecycle().phc_mark_clean("phc", id).await.unwrap();
  assert_eq!(marked.status, ReportStatus::Escalated);
  assert!(marked.pending_lab_approval);
  assert!(marked.active);

  let closed = t.lifecycle().lab_approve_clean("lab", id).await.unwrap();
  assert_eq!(closed.status, ReportStatus::Resolved);
  assert!(!closed.active);
  assert!(!closed.pending_lab_approval);

  let err = t.lifecycle().phc_mark_clean("phc", id).await.unwrap_err();
  assert!(matches!(err.guard(), Some(Guard::State { .. })));
}

#[tokio::test]
async fn lab_findings_are_attached_without_changing_status() {
  let t = tracker(with_quorum(1));
  let id = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;

  let lifecycle = t.lifecycle();
  let empty = lifecycle.lab_confirm_contaminated("lab", id, NewLabFindings::default()).await;
  assert!(matches!(empty, Err(Error::Validation(_))));

  let findings = NewLabFindings {
    test_result_ref: Some("results/a.pdf".into()),
    lab_name: Some("State Public Health Lab".into()),
    ..NewLabFindings::default()
  };
  let r = t.lifecycle().lab_confirm_contaminated("lab", id, findings).await.unwrap();
  assert_eq!(r.status, ReportStatus::Escalated);
  assert_eq!(r.lab_findings.unwrap().test_result_ref.as_deref(), Some("results/a.pdf"));
}

#[tokio::test]
async fn missing_report_is_not_found() {
  let t = tracker(EngineConfig::default());
  let err = t.lifecycle().upvote("", Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn empty_problem_is_rejected() {
  let t = tracker(EngineConfig::default());
  let err = t.lifecycle().submit("", keyed("   ")).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
  let err = t.lifecycle().submit("", keyed("x").pin("78100")).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

// ─── Assignment lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn assignment_needs_both_parties_before_closing() {
  let t = tracker(with_quorum(2));
  let a = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;
  let s = t.lifecycle().submit("", keyed("b")).await.unwrap();
  let aid = s.assignment.unwrap().assignment_id;
  let agg = t.aggregation();

  let doc = NewLabDocument { reference: "results/781001.pdf".into(), notes: None };
  let err = agg.upload_test_result("phc", aid, doc.clone()).await.unwrap_err();
  assert!(matches!(err.guard(), Some(Guard::Role { .. })));
  agg.upload_test_result("lab", aid, doc).await.unwrap();

  let err = agg.confirm_clean("lab", aid, None).await.unwrap_err();
  assert!(matches!(err.guard(), Some(Guard::Precondition { .. })));

  t.lifecycle().phc_mark_clean("phc", a).await.unwrap();
  let confirmed = agg.confirm_clean("lab", aid, Some("chlorinated".into())).await.unwrap();
  assert_eq!(confirmed.status, AssignmentStatus::ConfirmedClean);
  assert_eq!(confirmed.final_notes.as_deref(), Some("chlorinated"));

  for id in &confirmed.member_report_ids {
    let r = t.listings().get_report(*id).await.unwrap();
    assert_eq!(r.status, ReportStatus::Clean);
    assert!(!r.active);
  }

  let resolved = agg.resolve("lab", aid).await.unwrap();
  assert_eq!(resolved.status, AssignmentStatus::Resolved);

  // A new report in the same locality starts a fresh group.
  t.lifecycle().submit("", keyed("c")).await.unwrap();
  let next = t.lifecycle().submit("", keyed("d")).await.unwrap().assignment.unwrap();
  assert_ne!(next.assignment_id, aid);
}

#[tokio::test]
async fn solutions_are_listed_for_reuse() {
  let t = tracker(with_quorum(1));
  let aid = t.lifecycle().submit("", keyed("a")).await.unwrap().assignment.unwrap().assignment_id;
  let doc = NewLabDocument { reference: "solutions/boil.pdf".into(), notes: Some("boil".into()) };
  t.aggregation().provide_solution("lab", aid, doc).await.unwrap();

  let found = t.listings().solutions(Some("kamrup metropolitan")).await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].solution_ref, "solutions/boil.pdf");
  assert!(t.listings().solutions(Some("Dibrugarh")).await.unwrap().is_empty());
}

// ─── Proximity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn nearby_returns_reports_within_radius_nearest_first() {
  let t = tracker(EngineConfig::default());
  let origin = centre();
  for km in [7.0, 0.5, 12.0, 3.0] {
    let new = NewReport::new(format!("{km} km out"), SourceType::River, Severity::Low)
      .at(north_of(origin, km));
    t.lifecycle().submit("", new).await.unwrap();
  }

  let hits = t.proximity().nearby(origin, Some(5.0)).await.unwrap();
  assert_eq!(hits.len(), 2);
  assert!((hits[0].distance_km - 0.5).abs() < 1e-6);
  assert!((hits[1].distance_km - 3.0).abs() < 1e-6);

  let default_radius = t.proximity().nearby(origin, None).await.unwrap();
  assert_eq!(default_radius.len(), 2);

  let err = t.proximity().nearby(origin, Some(-1.0)).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn nearby_breaks_ties_by_age() {
  let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
  let t = Tracker::new(MemoryStore::new(), roles(), EngineConfig::default())
    .unwrap()
    .with_clock(clock.clone());
  let spot = north_of(centre(), 1.0);
  let lifecycle = t.lifecycle();
  let older = lifecycle.submit("", NewReport::new("x", SourceType::Well, Severity::Low).at(spot));
  let older = older.await.unwrap().report.report_id;
  clock.advance(chrono::Duration::minutes(5));
  t.lifecycle()
    .submit("", NewReport::new("y", SourceType::Well, Severity::Low).at(spot))
    .await
    .unwrap();

  let hits = t.proximity().nearby(centre(), None).await.unwrap();
  assert_eq!(hits.len(), 2);
  assert_eq!(hits[0].report.report_id, older);
}

#[tokio::test]
async fn area_stays_contaminated_until_the_lab_approves() {
  let t = tracker(with_quorum(1));
  let id = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;
  let spot = north_of(centre(), 0.5);
  assert!((haversine_km(spot, centre()) - 0.5).abs() < 1e-6);

  let status = t.proximity().area_status(spot, None).await.unwrap();
  assert_eq!(status.status, Contamination::Contaminated);
  assert_eq!(status.assignments.len(), 1);

  t.lifecycle().phc_mark_clean("phc", id).await.unwrap();
  let status = t.proximity().area_status(spot, None).await.unwrap();
  assert_eq!(status.status, Contamination::Contaminated);

  t.lifecycle().lab_approve_clean("lab", id).await.unwrap();
  let status = t.proximity().area_status(spot, None).await.unwrap();
  assert_eq!(status.status, Contamination::Clean);
  assert!(status.assignments.is_empty());
}

#[tokio::test]
async fn area_stays_contaminated_while_any_member_is_open() {
  let t = tracker(EngineConfig::default());
  let mut ids = Vec::new();
  for i in 0..5 {
    let s = t.lifecycle().submit("", keyed(&format!("report {i}"))).await.unwrap();
    ids.push(s.report.report_id);
  }
  let spot = north_of(centre(), 0.5);
  let status = t.proximity().area_status(spot, None).await.unwrap();
  assert_eq!(status.status, Contamination::Contaminated);
  assert_eq!(status.assignments[0].assignment.member_report_ids.len(), 5);

  let (last, rest) = ids.split_last().unwrap();
  t.lifecycle().phc_mark_clean("phc", ids[0]).await.unwrap();
  t.lifecycle().lab_approve_clean("lab", ids[0]).await.unwrap();
  let status = t.proximity().area_status(spot, None).await.unwrap();
  assert_eq!(status.status, Contamination::Contaminated);

  for id in &rest[1..] {
    t.lifecycle().phc_mark_clean("phc", *id).await.unwrap();
    t.lifecycle().lab_approve_clean("lab", *id).await.unwrap();
  }
  t.lifecycle().phc_mark_clean("phc", *last).await.unwrap();
  let status = t.proximity().area_status(spot, None).await.unwrap();
  assert_eq!(status.status, Contamination::Contaminated);

  t.lifecycle().lab_approve_clean("lab", *last).await.unwrap();
  let status = t.proximity().area_status(spot, None).await.unwrap();
  assert_eq!(status.status, Contamination::Clean);
}

#[tokio::test]
async fn area_status_ignores_distant_assignments() {
  let t = tracker(with_quorum(1));
  t.lifecycle().submit("", keyed("a")).await.unwrap();
  let status = t.proximity().area_status(north_of(centre(), 1.5), None).await.unwrap();
  assert_eq!(status.status, Contamination::Clean);
  let wider = t.proximity().area_status(north_of(centre(), 1.5), Some(2.0)).await.unwrap();
  assert_eq!(wider.status, Contamination::Contaminated);
}

#[tokio::test]
async fn empty_store_is_clean() {
  let t = tracker(EngineConfig::default());
  let status = t.proximity().area_status(centre(), None).await.unwrap();
  assert_eq!(status.status, Contamination::Clean);
  assert!(t.proximity().nearby(centre(), None).await.unwrap().is_empty());
}

// ─── Listings ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn district_queue_puts_escalated_first() {
  let t = tracker(EngineConfig { escalation: EscalationPolicy::PhcConfirmed, ..with_quorum(1) });
  let first = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;
  let second = t.lifecycle().submit("", keyed("b").pin("781005")).await.unwrap().report.report_id;
  let elsewhere = keyed("elsewhere").pin("786001").in_district("Dibrugarh");
  t.lifecycle().submit("", elsewhere).await.unwrap();
  t.lifecycle().escalate("phc", first).await.unwrap();

  let queue = t.listings().district_queue("phc").await.unwrap();
  assert_eq!(queue.len(), 2);
  assert_eq!(queue[0].report_id, first);
  assert_eq!(queue[1].report_id, second);

  let err = t.listings().district_queue("lab").await.unwrap_err();
  assert!(matches!(err, Error::Forbidden { .. }));

  let lab = t.listings().lab_queue("lab").await.unwrap();
  assert_eq!(lab.len(), 1);
  assert_eq!(lab[0].report_id, first);
}

#[tokio::test]
async fn statistics_count_open_and_closed_reports() {
  let t = tracker(with_quorum(1));
  let id = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;
  t.lifecycle().submit("", NewReport::new("b", SourceType::Canal, Severity::High)).await.unwrap();
  t.lifecycle().phc_mark_clean("phc", id).await.unwrap();
  t.lifecycle().lab_approve_clean("lab", id).await.unwrap();

  let all = t.listings().statistics(None).await.unwrap();
  assert_eq!((all.total_reports, all.active_reports, all.clean_reports), (2, 1, 1));
  let district = t.listings().statistics(Some("Kamrup Metropolitan")).await.unwrap();
  assert_eq!(district.total_reports, 1);

  let spots = t.listings().hotspots(None).await.unwrap();
  assert_eq!(spots.len(), 1);
  assert_eq!(spots[0].report_id, id);
}

// ─── Invariants and dependencies ─────────────────────────────────────────────

#[tokio::test]
async fn closed_reports_are_never_active() {
  let t = tracker(with_quorum(2));
  t.lifecycle().submit("", keyed("a")).await.unwrap();
  let s = t.lifecycle().submit("", keyed("b")).await.unwrap();
  let first = s.assignment.unwrap().member_report_ids[0];
  t.lifecycle().phc_mark_clean("phc", first).await.unwrap();
  t.lifecycle().lab_approve_clean("lab", first).await.unwrap();

  for r in t.store().all_reports().await.unwrap() {
    assert_eq!(r.active, !r.status.is_terminal());
  }
}

/// `MemoryStore` with switchable failures, delays and interfering writes.
#[derive(Debug, Default)]
struct FaultyStore {
  inner:                     MemoryStore,
  /// Reject every report write that escalates.
  refuse_escalations:        AtomicBool,
  /// Fail this many formation calls before letting them through.
  failing_formations:        AtomicUsize,
  /// Escalate the first member behind the engine's back on the next formation.
  race_next_formation:       AtomicBool,
  /// Fail this many assignment updates.
  failing_assignment_writes: AtomicUsize,
  /// Hold each report update this long after it has been applied.
  report_write_delay_ms:     AtomicU64,
}

fn injected() -> StoreError { StoreError::unavailable("injected failure") }

/// Decrement `counter` if it is positive; true when it was.
fn take(counter: &AtomicUsize) -> bool {
  counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

impl ReportStore for FaultyStore {
  async fn create_report(&self, report: Report) -> Result<Uuid, StoreError> {
    self.inner.create_report(report).await
  }

  async fn get_report(&self, id: Uuid) -> Result<Report, StoreError> {
    self.inner.get_report(id).await
  }

  async fn update_report(
    &self,
    id: Uuid,
    expected: Option<ReportStatus>,
    patch: ReportPatch,
  ) -> Result<Report, StoreError> {
    if patch.status == Some(ReportStatus::Escalated)
      && self.refuse_escalations.load(Ordering::SeqCst)
    {
      return Err(injected());
    }
    let result = self.inner.update_report(id, expected, patch).await;
    let delay = self.report_write_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
      tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    result
  }

  async fn query_reports(&self, field: ReportField) -> Result<Vec<Report>, StoreError> {
    self.inner.query_reports(field).await
  }

  async fn active_reports(&self) -> Result<Vec<Report>, StoreError> {
    self.inner.active_reports().await
  }

  async fn all_reports(&self) -> Result<Vec<Report>, StoreError> {
    self.inner.all_reports().await
  }
}

impl AssignmentStore for FaultyStore {
  async fn form_assignment(
    &self,
    assignment: Assignment,
    bind: ReportPatch,
  ) -> Result<Assignment, StoreError> {
    if take(&self.failing_formations) {
      return Err(injected());
    }
    if self.race_next_formation.swap(false, Ordering::SeqCst) {
      let patch =
        ReportPatch { status: Some(ReportStatus::Escalated), ..ReportPatch::default() };
      let first = assignment.member_report_ids[0];
      self.inner.update_report(first, Some(ReportStatus::Reported), patch).await?;
    }
    self.inner.form_assignment(assignment, bind).await
  }

  async fn get_assignment(&self, id: Uuid) -> Result<Assignment, StoreError> {
    self.inner.get_assignment(id).await
  }

  async fn update_assignment(
    &self,
    id: Uuid,
    expected: Option<AssignmentStatus>,
    patch: AssignmentPatch,
  ) -> Result<Assignment, StoreError> {
    if take(&self.failing_assignment_writes) {
      return Err(injected());
    }
    self.inner.update_assignment(id, expected, patch).await
  }

  async fn append_member(&self, id: Uuid, report_id: Uuid) -> Result<Assignment, StoreError> {
    self.inner.append_member(id, report_id).await
  }

  async fn assignments_by_status(
    &self,
    status: AssignmentStatus,
  ) -> Result<Vec<Assignment>, StoreError> {
    self.inner.assignments_by_status(status).await
  }

  async fn open_assignment_for(
    &self,
    key: LocalityKey,
  ) -> Result<Option<Assignment>, StoreError> {
    self.inner.open_assignment_for(key).await
  }
}

type FaultyTracker = Tracker<FaultyStore, StaticRoleResolver>;

fn faulty(store: FaultyStore, config: EngineConfig) -> FaultyTracker {
  let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
  Tracker::new(store, roles(), config).unwrap().with_clock(Arc::new(clock))
}

/// Every report in the locality as (status, assignment).
async fn group_state(t: &FaultyTracker) -> Vec<(ReportStatus, Option<Uuid>)> {
  let key = LocalityKey::parse(PIN).unwrap();
  let reports = t.store().query_reports(ReportField::Locality(key)).await.unwrap();
  reports.into_iter().map(|r| (r.status, r.assignment_id)).collect()
}

#[tokio::test]
async fn formation_escalates_members_in_one_write() {
  let store = FaultyStore::default();
  store.refuse_escalations.store(true, Ordering::SeqCst);
  let t = faulty(store, EngineConfig::default());

  for i in 0..5 {
    t.lifecycle().submit("", keyed(&format!("report {i}"))).await.unwrap();
  }
  let open = t.store().open_assignment_for(LocalityKey::parse(PIN).unwrap()).await.unwrap();
  let aid = open.expect("quorum reached").assignment_id;
  let state = group_state(&t).await;
  assert_eq!(state.len(), 5);
  assert!(state.iter().all(|s| *s == (ReportStatus::Escalated, Some(aid))));
}

#[tokio::test]
async fn failed_formation_leaves_no_partial_group() {
  let store = FaultyStore::default();
  store.failing_formations.store(1, Ordering::SeqCst);
  let t = faulty(store, EngineConfig::default());

  for i in 0..4 {
    t.lifecycle().submit("", keyed(&format!("report {i}"))).await.unwrap();
  }
  let err = t.lifecycle().submit("", keyed("report 4")).await.unwrap_err();
  assert!(matches!(err, Error::DependencyUnavailable { op: "form_assignment", .. }));
  assert!(t.listings().list_assignments(None).await.unwrap().is_empty());
  assert!(group_state(&t).await.iter().all(|s| *s == (ReportStatus::Reported, None)));

  let next = t.lifecycle().submit("", keyed("report 5")).await.unwrap();
  let formed = next.assignment.expect("quorum reached");
  assert_eq!(formed.member_report_ids.len(), 6);
  let bound = Some(formed.assignment_id);
  assert!(group_state(&t).await.iter().all(|s| *s == (ReportStatus::Escalated, bound)));
}

#[tokio::test]
async fn member_escalated_mid_formation_aborts_it() {
  let store = FaultyStore::default();
  store.race_next_formation.store(true, Ordering::SeqCst);
  let t = faulty(store, EngineConfig::default());

  let mut last = None;
  for i in 0..5 {
    last = Some(t.lifecycle().submit("", keyed(&format!("report {i}"))).await.unwrap());
  }
  // The retaken snapshot is one short of quorum.
  assert!(last.unwrap().assignment.is_none());
  assert!(t.listings().list_assignments(None).await.unwrap().is_empty());

  let state = group_state(&t).await;
  assert_eq!(state.iter().filter(|s| s.0 == ReportStatus::Escalated).count(), 1);
  assert!(state.iter().all(|s| s.1.is_none()));
}

#[tokio::test]
async fn confirm_clean_completes_on_retry() {
  let t = faulty(FaultyStore::default(), with_quorum(2));
  let a = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;
  let s = t.lifecycle().submit("", keyed("b")).await.unwrap();
  let aid = s.assignment.unwrap().assignment_id;
  let agg = t.aggregation();
  let doc = NewLabDocument { reference: "results/781001.pdf".into(), notes: None };
  agg.upload_test_result("lab", aid, doc).await.unwrap();
  t.lifecycle().phc_mark_clean("phc", a).await.unwrap();

  t.store().failing_assignment_writes.store(1, Ordering::SeqCst);
  let err = agg.confirm_clean("lab", aid, None).await.unwrap_err();
  assert!(matches!(err, Error::DependencyUnavailable { .. }));
  // Members are closed; the assignment has not moved.
  assert!(group_state(&t).await.iter().all(|s| s.0 == ReportStatus::Clean));
  let stuck = t.listings().get_assignment(aid).await.unwrap();
  assert_eq!(stuck.status, AssignmentStatus::TestResultUploaded);

  let confirmed = agg.confirm_clean("lab", aid, None).await.unwrap();
  assert_eq!(confirmed.status, AssignmentStatus::ConfirmedClean);
  agg.resolve("lab", aid).await.unwrap();
}

#[tokio::test]
async fn timed_out_write_can_still_land() {
  let config = EngineConfig { call_timeout_ms: 20, ..EngineConfig::default() };
  let t = faulty(FaultyStore::default(), config);
  let id = t.lifecycle().submit("", keyed("a")).await.unwrap().report.report_id;

  t.store().report_write_delay_ms.store(200, Ordering::SeqCst);
  let err = t.lifecycle().upvote("", id).await.unwrap_err();
  assert!(matches!(err, Error::DependencyUnavailable { .. }));
  t.store().report_write_delay_ms.store(0, Ordering::SeqCst);

  // The caller has to re-read before deciding to retry.
  let reread = t.listings().get_report(id).await.unwrap();
  assert_eq!(reread.upvote_count, 1);
}

struct SlowResolver;

impl RoleResolver for SlowResolver {
  async fn resolve<'a>(&'a self, _identity: &'a str) -> Result<Caller, StoreError> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Ok(Caller::public())
  }
}

#[tokio::test]
async fn slow_resolver_fails_closed() {
  let config = EngineConfig { call_timeout_ms: 20, ..EngineConfig::default() };
  let t = Tracker::new(MemoryStore::new(), SlowResolver, config).unwrap();
  let err = t.lifecycle().submit("anyone", keyed("a")).await.unwrap_err();
  assert!(matches!(err, Error::DependencyUnavailable { op: "resolve_role", .. }));
  assert!(t.store().all_reports().await.unwrap().is_empty());
}

#[test]
fn invalid_config_is_rejected_at_construction() {
  let result = Tracker::new(MemoryStore::new(), roles(), with_quorum(0));
  assert!(matches!(result, Err(Error::Validation(_))));
}
