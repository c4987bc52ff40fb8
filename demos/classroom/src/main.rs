use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use futures_util::{future::join_all, StreamExt};
use rollcall::prelude::*;
use rollcall::telemetry::init_tracing;

// ---------------------------------------------------------------------------
// The class
// ---------------------------------------------------------------------------

const COURSE: CourseId = CourseId(2041);
const PROF: InstructorId = InstructorId(1);
const CLASS_MINUTES: u32 = 15;

#[derive(Clone, Copy)]
enum Scan {
    Honest,
    DoubleTap,
    /// Edits the token before submitting it.
    Tampered,
    /// Scans a photo of the first token.
    OldPhoto,
}

struct Arrival {
    student: StudentId,
    minute: u32,
    scan: Scan,
}

impl Arrival {
    fn new(student: u64, minute: u32, scan: Scan) -> Self {
        Self {
            student: StudentId(student),
            minute,
            scan,
        }
    }
}

fn arrivals() -> Vec<Arrival> {
    let honest = [
        (1, 0),
        (2, 1),
        (4, 2),
        (5, 3),
        (6, 4),
        (7, 5),
        (8, 7),
        (9, 9),
        (10, 11),
        (11, 12),
        (12, 14),
    ];
    let mut out: Vec<Arrival> = honest
        .into_iter()
        .map(|(id, minute)| Arrival::new(id, minute, Scan::Honest))
        .collect();
    out.push(Arrival::new(3, 1, Scan::DoubleTap));
    // Not enrolled.
    out.push(Arrival::new(99, 2, Scan::Honest));
    out.push(Arrival::new(13, 6, Scan::Tampered));
    out.push(Arrival::new(14, 8, Scan::OldPhoto));
    out
}

const ENROLLED: std::ops::RangeInclusive<u64> = 1..=14;

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClassReport {
    recorded: usize,
    late: usize,
    /// Rejection code → count.
    rejected: BTreeMap<&'static str, usize>,
    deltas_seen: usize,
    final_counts: Option<RosterCounts>,
}

fn tamper(raw: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return raw.to_string();
    };
    if let Some(issued) = value["issuedAtMillis"].as_i64() {
        value["issuedAtMillis"] = (issued + 60_000).into();
    }
    value.to_string()
}

/// Runs one class meeting minute by minute on `clock`, rotating the token
/// every two simulated minutes the way the timer does in real time.
async fn run_class(
    service: &AttendanceService<MemoryStore, ManualClock>,
    clock: &ManualClock,
) -> Result<ClassReport, RollcallError> {
    service.store().enroll_all(COURSE, ENROLLED.map(StudentId)).await;
    let session = service.start(COURSE, PROF, Some(10)).await?;
    eprintln!(
        "session {} open, late after {} min",
        session.id, session.late_threshold_minutes
    );

    let roster = service.subscribe(session.id).await?;
    let dashboard = tokio::spawn(async move {
        let mut seen = 0;
        let mut last = None;
        let mut deltas = std::pin::pin!(roster.into_stream());
        while let Some(delta) = deltas.next().await {
            seen += 1;
            match &delta {
                RosterDelta::Snapshot(s) => {
                    eprintln!("  [dashboard] {} enrolled", s.counts.enrolled)
                }
                RosterDelta::Marked { record, counts } => {
                    eprintln!(
                        "  [dashboard] {} {} ({}/{} present, {} late)",
                        record.student_id,
                        if record.is_late { "late" } else { "on time" },
                        counts.present,
                        counts.enrolled,
                        counts.late,
                    );
                    last = Some(*counts);
                }
                RosterDelta::Closed { counts, .. } => {
                    eprintln!(
                        "  [dashboard] closed at {}%",
                        counts.attendance_percent()
                    );
                    last = Some(*counts);
                }
            }
        }
        (seen, last)
    });

    let first_token = service.display(session.id).await?.raw;
    let arrivals = arrivals();
    let mut report = ClassReport::default();

    for minute in 0..=CLASS_MINUTES {
        if minute > 0 && minute % 2 == 0 {
            service.rotate(session.id).await?;
        }
        let shown = service.display(session.id).await?;
        eprintln!(
            "t+{minute:02}:00 token rotation {} ({} left)",
            shown.rotation,
            shown.countdown()
        );

        let scans = arrivals
            .iter()
            .filter(|a| a.minute == minute)
            .flat_map(|a| {
                let raw = match a.scan {
                    Scan::Honest | Scan::DoubleTap => shown.raw.clone(),
                    Scan::Tampered => tamper(&shown.raw),
                    Scan::OldPhoto => first_token.clone(),
                };
                let copies = 1 + usize::from(matches!(a.scan, Scan::DoubleTap));
                std::iter::repeat_n((a.student, raw), copies)
            })
            .map(|(student, raw)| async move {
                (student, service.submit(&raw, student).await)
            });

        for (student, outcome) in join_all(scans).await {
            match outcome {
                Ok(record) => {
                    report.recorded += 1;
                    report.late += usize::from(record.is_late);
                }
                Err(err) => {
                    let code = err.verify_code().unwrap_or("error");
                    eprintln!("  scan by {student} rejected: {code}");
                    *report.rejected.entry(code).or_default() += 1;
                }
            }
        }

        clock.advance(Duration::from_secs(60));
    }

    service.end(session.id).await?;
    if let Ok((seen, counts)) = dashboard.await {
        report.deltas_seen = seen;
        report.final_counts = counts;
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RollcallConfig::from_env()?;
    init_tracing(&config.log_filter);

    let clock = ManualClock::new(Utc::now());
    let service = AttendanceService::builder()
        .config(config)
        .clock(clock.clone())
        .build()?;

    let report = run_class(&service, &clock).await?;
    let summary = service.course_summary(COURSE).await?;
    service.shutdown().await;

    eprintln!(
        "{} recorded ({} late), rejections: {:?}",
        report.recorded, report.late, report.rejected
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
