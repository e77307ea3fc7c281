//! [`SqliteStore`]: the SQLite implementation of [`ReportStore`] and
//! [`AssignmentStore`].

use std::path::Path;

use luit_core::{
  assignment::{Assignment, AssignmentStatus},
  locality::LocalityKey,
  report::{Report, ReportStatus},
  store::{
    AssignmentPatch, AssignmentStore, ReportField, ReportPatch, ReportStore, StoreError,
  },
};
use rusqlite::OptionalExtension as _;
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    RawAssignment, RawReport, encode_document, encode_dt, encode_findings, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Row access ──────────────────────────────────────────────────────────────

const REPORT_COLUMNS: &str = "report_id, problem, source_type, severity, latitude, longitude,
   area_name, district, district_id, locality_key, image_ref, status, active,
   pending_lab_approval, phc_marked_clean_at, lab_findings, upvote_count,
   assignment_id, created_at, last_transition_at";

const ASSIGNMENT_COLUMNS: &str = "assignment_id, locality_key, status, rep_latitude,
   rep_longitude, severity, district, district_id, area_name, test_result, solution,
   final_notes, created_at, updated_at";

fn report_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawReport> {
  Ok(RawReport {
    report_id:            row.get(0)?,
    problem:              row.get(1)?,
    source_type:          row.get(2)?,
    severity:             row.get(3)?,
    latitude:             row.get(4)?,
    longitude:            row.get(5)?,
    area_name:            row.get(6)?,
    district:             row.get(7)?,
    district_id:          row.get(8)?,
    locality_key:         row.get(9)?,
    image_ref:            row.get(10)?,
    status:               row.get(11)?,
    active:               row.get(12)?,
    pending_lab_approval: row.get(13)?,
    phc_marked_clean_at:  row.get(14)?,
    lab_findings:         row.get(15)?,
    upvote_count:         row.get(16)?,
    assignment_id:        row.get(17)?,
    created_at:           row.get(18)?,
    last_transition_at:   row.get(19)?,
  })
}

fn select_reports<P: rusqlite::Params>(
  conn: &rusqlite::Connection,
  filter: &str,
  params: P,
) -> rusqlite::Result<Vec<RawReport>> {
  let sql =
    format!("SELECT {REPORT_COLUMNS} FROM reports {filter} ORDER BY created_at, report_id");
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt.query_map(params, report_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

fn select_assignments<P: rusqlite::Params>(
  conn: &rusqlite::Connection,
  filter: &str,
  params: P,
) -> rusqlite::Result<Vec<RawAssignment>> {
  let sql = format!(
    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments {filter} ORDER BY created_at, assignment_id"
  );
  let mut stmt = conn.prepare(&sql)?;
  let mut rows = stmt
    .query_map(params, |row| {
      Ok(RawAssignment {
        assignment_id: row.get(0)?,
        locality_key:  row.get(1)?,
        status:        row.get(2)?,
        rep_latitude:  row.get(3)?,
        rep_longitude: row.get(4)?,
        severity:      row.get(5)?,
        district:      row.get(6)?,
        district_id:   row.get(7)?,
        area_name:     row.get(8)?,
        test_result:   row.get(9)?,
        solution:      row.get(10)?,
        final_notes:   row.get(11)?,
        created_at:    row.get(12)?,
        updated_at:    row.get(13)?,
        members:       Vec::new(),
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut members = conn.prepare(
    "SELECT report_id FROM assignment_members WHERE assignment_id = ?1 ORDER BY rowid",
  )?;
  for raw in &mut rows {
    raw.members = members
      .query_map(rusqlite::params![raw.assignment_id], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
  }
  Ok(rows)
}

/// Result of a conditional write performed on the database thread.
enum Cas<T> {
  Missing,
  Stale,
  Done(T),
}

impl<T> Cas<T> {
  fn into_result(self) -> Result<T, StoreError> {
    match self {
      Self::Missing => Err(StoreError::NotFound),
      Self::Stale => Err(StoreError::Conflict),
      Self::Done(value) => Ok(value),
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Report and assignment storage backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    debug!(path = %path.display(), "opened sqlite store");
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn reports_where(
    &self,
    filter: &'static str,
    value: Option<String>,
  ) -> Result<Vec<Report>> {
    let raws = self
      .conn
      .call(move |conn| {
        let rows = match value {
          Some(v) => select_reports(conn, filter, rusqlite::params![v])?,
          None => select_reports(conn, filter, [])?,
        };
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawReport::into_report).collect()
  }

  async fn load_report(&self, id: Uuid) -> Result<Option<Report>> {
    let mut reports = self.reports_where("WHERE report_id = ?1", Some(encode_uuid(id))).await?;
    Ok(reports.pop())
  }

  async fn assignments_where(
    &self,
    filter: &'static str,
    value: String,
  ) -> Result<Vec<Assignment>> {
    let raws = self
      .conn
      .call(move |conn| Ok(select_assignments(conn, filter, rusqlite::params![value])?))
      .await?;
    raws.into_iter().map(RawAssignment::into_assignment).collect()
  }

  async fn insert_report(&self, report: &Report) -> Result<()> {
    let report_id = encode_uuid(report.report_id);
    let problem = report.problem.clone();
    let source_type = report.source_type.as_str();
    let severity = report.severity.as_str();
    let latitude = report.location.map(|c| c.latitude);
    let longitude = report.location.map(|c| c.longitude);
    let area_name = report.area_name.clone();
    let district = report.district.clone();
    let district_id = report.district_id.clone();
    let locality_key = report.locality_key.as_ref().map(|k| k.as_str().to_owned());
    let image_ref = report.image_ref.clone();
    let status = report.status.as_str();
    let active = report.active;
    let pending = report.pending_lab_approval;
    let marked_at = report.phc_marked_clean_at.map(encode_dt);
    let findings = report.lab_findings.as_ref().map(encode_findings).transpose()?;
    let upvotes = i64::try_from(report.upvote_count)
      .map_err(|e| Error::decode("upvote_count", e))?;
    let assignment_id = report.assignment_id.map(encode_uuid);
    let created_at = encode_dt(report.created_at);
    let last_transition_at = encode_dt(report.last_transition_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO reports (
             report_id, problem, source_type, severity, latitude, longitude,
             area_name, district, district_id, locality_key, image_ref, status,
             active, pending_lab_approval, phc_marked_clean_at, lab_findings,
             upvote_count, assignment_id, created_at, last_transition_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
          rusqlite::params![
            report_id,
            problem,
            source_type,
            severity,
            latitude,
            longitude,
            area_name,
            district,
            district_id,
            locality_key,
            image_ref,
            status,
            active,
            pending,
            marked_at,
            findings,
            upvotes,
            assignment_id,
            created_at,
            last_transition_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn patch_report(
    &self,
    id: Uuid,
    expected: Option<ReportStatus>,
    patch: ReportPatch,
  ) -> Result<Cas<Report>> {
    let id_str = encode_uuid(id);
    let expected = expected.map(ReportStatus::as_str);
    let status = patch.status.map(ReportStatus::as_str);
    let active = patch.active;
    let pending = patch.pending_lab_approval;
    let marked_at = patch.phc_marked_clean_at.map(encode_dt);
    let findings = patch.lab_findings.as_ref().map(encode_findings).transpose()?;
    let assignment_id = patch.assignment_id.map(encode_uuid);
    let moved_at = patch.last_transition_at.map(encode_dt);
    let upvotes =
      i64::try_from(patch.upvotes).map_err(|e| Error::decode("upvote_count", e))?;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT status FROM reports WHERE report_id = ?1",
            rusqlite::params![id_str],
            |row| row.get(0),
          )
          .optional()?;
        let Some(current) = current else {
          return Ok(Cas::Missing);
        };
        if expected.is_some_and(|e| e != current) {
          return Ok(Cas::Stale);
        }
        tx.execute(
          "UPDATE reports SET
             status               = COALESCE(?2, status),
             active               = COALESCE(?3, active),
             pending_lab_approval = COALESCE(?4, pending_lab_approval),
             phc_marked_clean_at  = COALESCE(?5, phc_marked_clean_at),
             lab_findings         = COALESCE(?6, lab_findings),
             assignment_id        = COALESCE(?7, assignment_id),
             last_transition_at   = COALESCE(?8, last_transition_at),
             upvote_count         = upvote_count + ?9
           WHERE report_id = ?1",
          rusqlite::params![
            id_str,
            status,
            active,
            pending,
            marked_at,
            findings,
            assignment_id,
            moved_at,
            upvotes,
          ],
        )?;
        let row = select_reports(&tx, "WHERE report_id = ?1", rusqlite::params![id_str])?.pop();
        tx.commit()?;
        Ok(match row {
          Some(raw) => Cas::Done(raw),
          None => Cas::Missing,
        })
      })
      .await?;

    Ok(match outcome {
      Cas::Done(raw) => Cas::Done(raw.into_report()?),
      Cas::Missing => Cas::Missing,
      Cas::Stale => Cas::Stale,
    })
  }

  /// Insert `assignment` and bind its members in one transaction. A member
  /// that is no longer `reported` and unbound rolls the whole thing back.
  async fn insert_assignment(
    &self,
    assignment: &Assignment,
    bind: &ReportPatch,
  ) -> Result<Cas<()>> {
    let assignment_id = encode_uuid(assignment.assignment_id);
    let locality_key = assignment.locality_key.as_str().to_owned();
    let status = assignment.status.as_str();
    let latitude = assignment.representative_location.latitude;
    let longitude = assignment.representative_location.longitude;
    let severity = assignment.severity.as_str();
    let district = assignment.district.clone();
    let district_id = assignment.district_id.clone();
    let area_name = assignment.area_name.clone();
    let test_result = assignment.test_result.as_ref().map(encode_document).transpose()?;
    let solution = assignment.solution.as_ref().map(encode_document).transpose()?;
    let final_notes = assignment.final_notes.clone();
    let created_at = encode_dt(assignment.created_at);
    let updated_at = encode_dt(assignment.updated_at);
    let members: Vec<String> =
      assignment.member_report_ids.iter().copied().map(encode_uuid).collect();
    let bound_status = bind.status.map(ReportStatus::as_str);
    let bound_active = bind.active;
    let moved_at = bind.last_transition_at.map(encode_dt);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO assignments (
             assignment_id, locality_key, status, rep_latitude, rep_longitude,
             severity, district, district_id, area_name, test_result, solution,
             final_notes, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
          rusqlite::params![
            assignment_id,
            locality_key,
            status,
            latitude,
            longitude,
            severity,
            district,
            district_id,
            area_name,
            test_result,
            solution,
            final_notes,
            created_at,
            updated_at,
          ],
        )?;
        {
          let mut claim = tx.prepare(
            "UPDATE reports SET
               status             = COALESCE(?2, status),
               active             = COALESCE(?3, active),
               assignment_id      = ?4,
               last_transition_at = COALESCE(?5, last_transition_at)
             WHERE report_id = ?1 AND status = 'reported' AND assignment_id IS NULL",
          )?;
          let mut insert = tx.prepare(
            "INSERT OR IGNORE INTO assignment_members (assignment_id, report_id)
             VALUES (?1, ?2)",
          )?;
          for member in &members {
            let bound = claim.execute(rusqlite::params![
              member,
              bound_status,
              bound_active,
              assignment_id,
              moved_at,
            ])?;
            // Dropping `tx` without committing rolls back the insert above.
            if bound != 1 {
              return Ok(Cas::Stale);
            }
            insert.execute(rusqlite::params![assignment_id, member])?;
          }
        }
        tx.commit()?;
        Ok(Cas::Done(()))
      })
      .await?;
    Ok(outcome)
  }

  async fn patch_assignment(
    &self,
    id: Uuid,
    expected: Option<AssignmentStatus>,
    patch: AssignmentPatch,
  ) -> Result<Cas<Assignment>> {
    let id_str = encode_uuid(id);
    let expected = expected.map(AssignmentStatus::as_str);
    let status = patch.status.map(AssignmentStatus::as_str);
    let test_result = patch.test_result.as_ref().map(encode_document).transpose()?;
    let solution = patch.solution.as_ref().map(encode_document).transpose()?;
    let final_notes = patch.final_notes;
    let updated_at = patch.updated_at.map(encode_dt);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT status FROM assignments WHERE assignment_id = ?1",
            rusqlite::params![id_str],
            |row| row.get(0),
          )
          .optional()?;
        let Some(current) = current else {
          return Ok(Cas::Missing);
        };
        if expected.is_some_and(|e| e != current) {
          return Ok(Cas::Stale);
        }
        tx.execute(
          "UPDATE assignments SET
             status      = COALESCE(?2, status),
             test_result = COALESCE(?3, test_result),
             solution    = COALESCE(?4, solution),
             final_notes = COALESCE(?5, final_notes),
             updated_at  = COALESCE(?6, updated_at)
           WHERE assignment_id = ?1",
          rusqlite::params![id_str, status, test_result, solution, final_notes, updated_at],
        )?;
        let row =
          select_assignments(&tx, "WHERE assignment_id = ?1", rusqlite::params![id_str])?.pop();
        tx.commit()?;
        Ok(match row {
          Some(raw) => Cas::Done(raw),
          None => Cas::Missing,
        })
      })
      .await?;

    Ok(match outcome {
      Cas::Done(raw) => Cas::Done(raw.into_assignment()?),
      Cas::Missing => Cas::Missing,
      Cas::Stale => Cas::Stale,
    })
  }

  async fn add_member(&self, id: Uuid, report_id: Uuid) -> Result<Cas<Assignment>> {
    let id_str = encode_uuid(id);
    let report_str = encode_uuid(report_id);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT status FROM assignments WHERE assignment_id = ?1",
            rusqlite::params![id_str],
            |row| row.get(0),
          )
          .optional()?;
        match current.as_deref() {
          None => return Ok(Cas::Missing),
          Some(status) if status == AssignmentStatus::Resolved.as_str() => {
            return Ok(Cas::Stale);
          }
          Some(_) => {}
        }
        tx.execute(
          "INSERT OR IGNORE INTO assignment_members (assignment_id, report_id)
           VALUES (?1, ?2)",
          rusqlite::params![id_str, report_str],
        )?;
        let row =
          select_assignments(&tx, "WHERE assignment_id = ?1", rusqlite::params![id_str])?.pop();
        tx.commit()?;
        Ok(match row {
          Some(raw) => Cas::Done(raw),
          None => Cas::Missing,
        })
      })
      .await?;

    Ok(match outcome {
      Cas::Done(raw) => Cas::Done(raw.into_assignment()?),
      Cas::Missing => Cas::Missing,
      Cas::Stale => Cas::Stale,
    })
  }
}

// ─── ReportStore impl ────────────────────────────────────────────────────────

impl ReportStore for SqliteStore {
  async fn create_report(&self, report: Report) -> Result<Uuid, StoreError> {
    self.insert_report(&report).await?;
    Ok(report.report_id)
  }

  async fn get_report(&self, id: Uuid) -> Result<Report, StoreError> {
    self.load_report(id).await?.ok_or(StoreError::NotFound)
  }

  async fn update_report(
    &self,
    id: Uuid,
    expected: Option<ReportStatus>,
    patch: ReportPatch,
  ) -> Result<Report, StoreError> {
    self.patch_report(id, expected, patch).await?.into_result()
  }

  async fn query_reports(&self, field: ReportField) -> Result<Vec<Report>, StoreError> {
    let (filter, value) = match field {
      ReportField::Locality(key) => ("WHERE locality_key = ?1", String::from(key)),
      ReportField::District(id) => ("WHERE district_id = ?1", id),
      ReportField::Status(status) => ("WHERE status = ?1", status.as_str().to_owned()),
      ReportField::Assignment(id) => ("WHERE assignment_id = ?1", encode_uuid(id)),
    };
    Ok(self.reports_where(filter, Some(value)).await?)
  }

  async fn active_reports(&self) -> Result<Vec<Report>, StoreError> {
    Ok(self.reports_where("WHERE active = 1", None).await?)
  }

  async fn all_reports(&self) -> Result<Vec<Report>, StoreError> {
    Ok(self.reports_where("", None).await?)
  }
}

// ─── AssignmentStore impl ────────────────────────────────────────────────────

impl AssignmentStore for SqliteStore {
  async fn form_assignment(
    &self,
    assignment: Assignment,
    bind: ReportPatch,
  ) -> Result<Assignment, StoreError> {
    self.insert_assignment(&assignment, &bind).await?.into_result()?;
    self.get_assignment(assignment.assignment_id).await
  }

  async fn get_assignment(&self, id: Uuid) -> Result<Assignment, StoreError> {
    let mut found = self.assignments_where("WHERE assignment_id = ?1", encode_uuid(id)).await?;
    found.pop().ok_or(StoreError::NotFound)
  }

  async fn update_assignment(
    &self,
    id: Uuid,
    expected: Option<AssignmentStatus>,
    patch: AssignmentPatch,
  ) -> Result<Assignment, StoreError> {
    self.patch_assignment(id, expected, patch).await?.into_result()
  }

  async fn append_member(&self, id: Uuid, report_id: Uuid) -> Result<Assignment, StoreError> {
    self.add_member(id, report_id).await?.into_result()
  }

  async fn assignments_by_status(
    &self,
    status: AssignmentStatus,
  ) -> Result<Vec<Assignment>, StoreError> {
    Ok(self.assignments_where("WHERE status = ?1", status.as_str().to_owned()).await?)
  }

  async fn open_assignment_for(
    &self,
    key: LocalityKey,
  ) -> Result<Option<Assignment>, StoreError> {
    let mut found = self
      .assignments_where("WHERE locality_key = ?1 AND status != 'resolved'", String::from(key))
      .await?;
    Ok(found.pop())
  }
}
