use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use donor_match_core::config::default_countdown_secs;
use donor_match_core::pipeline::PipelineEventKind;
use donor_match_core::urgency::{countdown_from_schedule, shared_clock, UrgencyClock};
use donor_match_core::{
    CoreConfig, Donor, EscalationConfig, EscalationController, LogisticsConditions,
    MatchConstraints, MatchError, MatchRequest, MatchResult, MatchingService, Patient,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "donor-match")]
#[command(about = "Blood donor matching and prioritization CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one donor against a patient
    Score {
        /// Patient JSON file
        patient: PathBuf,
        /// Donor JSON file
        donor: PathBuf,
        /// Date recency is measured against (YYYY-MM-DD, default today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Filter a donor pool by match constraints
    Filter {
        /// Patient JSON file
        patient: PathBuf,
        /// Donor list JSON file
        donors: PathBuf,
        /// Match constraints JSON file (optional)
        #[arg(long)]
        constraints: Option<PathBuf>,
    },
    /// Run the full matching pipeline and print its progress
    Match {
        /// Patient JSON file
        patient: PathBuf,
        /// Donor list JSON file
        donors: PathBuf,
        /// Match constraints JSON file (optional)
        #[arg(long)]
        constraints: Option<PathBuf>,
        /// Traffic delay multiplier
        #[arg(long, default_value_t = 1.0)]
        traffic: f64,
        /// Weather delay multiplier
        #[arg(long, default_value_t = 1.0)]
        weather: f64,
        /// Activate emergency mode before matching
        #[arg(long)]
        emergency: bool,
    },
    /// Show the urgency level for a countdown or a transfusion schedule
    Urgency {
        /// Seconds until the next transfusion
        #[arg(conflicts_with = "last_transfusion")]
        countdown: Option<u64>,
        /// Last transfusion time (RFC 3339)
        #[arg(long)]
        last_transfusion: Option<DateTime<Utc>>,
        /// Hours between transfusions
        #[arg(long, default_value_t = 72)]
        interval_hours: i64,
    },
    /// Print the constraints emergency mode would apply
    Escalate {
        /// Match constraints JSON file
        constraints: PathBuf,
        /// Emergency search radius in km
        #[arg(long)]
        radius: Option<f64>,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> MatchResult<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        MatchError::InvalidInput(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(MatchError::Deserialization)
}

fn read_constraints(path: Option<&Path>) -> MatchResult<MatchConstraints> {
    path.map_or_else(|| Ok(MatchConstraints::default()), read_json::<MatchConstraints>)
}

fn print_json<T: serde::Serialize>(value: &T) -> MatchResult<()> {
    let out = serde_json::to_string_pretty(value).map_err(MatchError::Serialization)?;
    println!("{out}");
    Ok(())
}

fn service() -> MatchingService {
    MatchingService::new(
        Arc::new(CoreConfig::default()),
        shared_clock(default_countdown_secs()),
    )
}

fn score(patient: &Path, donor: &Path, as_of: Option<NaiveDate>) -> MatchResult<()> {
    let patient: Patient = read_json(patient)?;
    let donor: Donor = read_json(donor)?;
    let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
    let result = service().score(&patient, &donor, as_of)?;
    println!(
        "Donor {}: score {} ({:?}), blood type compatible: {}",
        result.donor_id,
        result.score,
        result.band(),
        result.blood_type_compatible
    );
    if result.capped {
        println!("Score capped: missing antigens {:?}", result.antigens.missing());
    }
    Ok(())
}

fn filter(patient: &Path, donors: &Path, constraints: Option<&Path>) -> MatchResult<()> {
    let patient: Patient = read_json(patient)?;
    let donors: Vec<Donor> = read_json(donors)?;
    let constraints = read_constraints(constraints)?;
    let report = service().filter(&patient, &donors, &constraints, Utc::now().date_naive())?;

    if report.eligible.is_empty() {
        println!("No eligible donors.");
    }
    for donor in &report.eligible {
        println!("eligible  {}", donor.id);
    }
    for (donor_id, reason) in &report.excluded {
        println!("excluded  {donor_id}: {reason}");
    }
    Ok(())
}

async fn run_match(
    patient: &Path,
    donors: &Path,
    constraints: Option<&Path>,
    logistics: LogisticsConditions,
    emergency: bool,
) -> MatchResult<()> {
    let request = MatchRequest {
        patient: read_json(patient)?,
        donors: read_json(donors)?,
        constraints: read_constraints(constraints)?,
        logistics,
    };
    let service = service();

    let mut handle = if emergency {
        let activation = service.activate_emergency(request)?;
        println!(
            "Emergency broadcast issued to {} donors ({} acknowledged), expected response in {}s",
            activation.issued.target_count,
            activation.issued.acknowledged,
            activation.issued.estimated_response_secs
        );
        if let Some(warning) = &activation.issued.delivery_warning {
            eprintln!("Warning: {warning}");
        }
        activation.run
    } else {
        service.start_run(request)?
    };

    while let Some(event) = handle.next_event().await {
        match event.kind {
            PipelineEventKind::StageActive { stage } => println!("[ .. ] {}", stage.name()),
            PipelineEventKind::StageCompleted { stage, progress } => {
                println!("[{:>3.0}%] {} done", progress * 100.0, stage.name());
            }
            PipelineEventKind::StageFailed { stage, reason } => {
                eprintln!("{} failed: {reason}", stage.name());
                break;
            }
            PipelineEventKind::Superseded { .. } => {
                eprintln!("Run was cancelled");
                break;
            }
            PipelineEventKind::Completed { outcome } => {
                if outcome.no_eligible_donors() {
                    println!("No eligible donors.");
                }
                for m in &outcome.matches {
                    let distance = m
                        .distance_km
                        .map_or_else(|| "?".to_string(), |d| format!("{d:.1} km"));
                    let eta = m
                        .eta_minutes
                        .map_or_else(|| "?".to_string(), |t| format!("{t} min"));
                    println!(
                        "#{} {} ({}) score {} reliability {:?} distance {distance} eta {eta}",
                        m.rank,
                        m.donor.id,
                        m.donor.blood_type,
                        m.compatibility.score,
                        m.donor.reliability
                    );
                }
                for e in &outcome.excluded {
                    println!("excluded {} at {}: {}", e.donor_id, e.stage.name(), e.reason);
                }
                break;
            }
        }
    }
    Ok(())
}

fn urgency(
    countdown: Option<u64>,
    last_transfusion: Option<DateTime<Utc>>,
    interval_hours: i64,
) -> MatchResult<()> {
    let countdown = match (countdown, last_transfusion) {
        (Some(c), _) => c,
        (None, Some(last)) => {
            let interval = chrono::Duration::try_hours(interval_hours).ok_or_else(|| {
                MatchError::InvalidInput(format!("--interval-hours {interval_hours} is out of range"))
            })?;
            countdown_from_schedule(last, interval, Utc::now())?
        }
        (None, None) => {
            return Err(MatchError::InvalidInput(
                "either a countdown or --last-transfusion is required".into(),
            ))
        }
    };
    let clock = UrgencyClock::new(countdown);
    println!("Countdown: {}s, urgency: {}", clock.countdown(), clock.level());
    Ok(())
}

fn escalate(constraints: &Path, radius: Option<f64>) -> MatchResult<()> {
    let current: MatchConstraints = read_json(constraints)?;
    let mut config = EscalationConfig::default();
    if let Some(radius) = radius {
        config = config.with_radius(radius);
    }
    config.validate()?;
    let relaxed = EscalationController::new().activate(&config, &current);
    println!("Baseline:");
    print_json(&current)?;
    println!("Escalated:");
    print_json(&relaxed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Score {
            patient,
            donor,
            as_of,
        }) => score(&patient, &donor, as_of),
        Some(Commands::Filter {
            patient,
            donors,
            constraints,
        }) => filter(&patient, &donors, constraints.as_deref()),
        Some(Commands::Match {
            patient,
            donors,
            constraints,
            traffic,
            weather,
            emergency,
        }) => {
            let logistics = LogisticsConditions {
                traffic_factor: traffic,
                weather_factor: weather,
            };
            run_match(
                &patient,
                &donors,
                constraints.as_deref(),
                logistics,
                emergency,
            )
            .await
        }
        Some(Commands::Urgency {
            countdown,
            last_transfusion,
            interval_hours,
        }) => urgency(countdown, last_transfusion, interval_hours),
        Some(Commands::Escalate {
            constraints,
            radius,
        }) => escalate(&constraints, radius),
        None => {
            println!("Use 'donor-match --help' for commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_rejects_out_of_range_interval() {
        let err = urgency(None, Some(Utc::now()), i64::MAX).unwrap_err();
        assert!(matches!(err, MatchError::InvalidInput(_)));
    }

    #[test]
    fn urgency_needs_a_countdown_or_schedule() {
        assert!(urgency(None, None, 72).is_err());
        assert!(urgency(Some(120), None, 72).is_ok());
    }
}
