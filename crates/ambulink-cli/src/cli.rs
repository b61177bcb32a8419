use std::path::PathBuf;

use ambulink_core::Vitals;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ambulink")]
#[command(about = "Capture patient records in the field and follow facility alerts")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local outbox database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a patient record for the destination facility
    #[command(alias = "new")]
    Capture(CaptureArgs),
    /// List records that have not reached the facility yet
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Submit pending records now
    Sync,
    /// Return a held record to automatic sync
    Requeue {
        /// Record id as printed by `capture` or `pending`
        record_id: String,
    },
    /// Delete records the facility already accepted
    PurgeSettled,
    /// Keep syncing in the background until interrupted
    Daemon,
    /// Follow a facility room's alerts
    Watch {
        /// Facility room to join
        room: String,
    },
    /// Triage vitals and a complaint without queueing anything
    Classify {
        /// Chief complaint
        complaint: Vec<String>,
        #[command(flatten)]
        vitals: VitalsArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Destination facility room
    #[arg(long)]
    pub room: String,
    /// Chief complaint
    pub complaint: Vec<String>,
    /// Patient name
    #[arg(long)]
    pub name: Option<String>,
    /// Patient age in years
    #[arg(long)]
    pub age: Option<u32>,
    /// Crew notes
    #[arg(long)]
    pub notes: Option<String>,
    /// Receiving department hint
    #[arg(long)]
    pub department: Option<String>,
    /// Minutes until arrival
    #[arg(long, value_name = "MINUTES")]
    pub eta: Option<u32>,
    #[command(flatten)]
    pub vitals: VitalsArgs,
}

#[derive(Args, Debug, Default)]
pub struct VitalsArgs {
    /// Heart rate (bpm)
    #[arg(long)]
    pub hr: Option<f64>,
    /// Blood pressure, e.g. 120/80
    #[arg(long)]
    pub bp: Option<String>,
    /// Oxygen saturation (%)
    #[arg(long)]
    pub spo2: Option<f64>,
    /// Temperature (°C)
    #[arg(long)]
    pub temp: Option<f64>,
    /// Respiratory rate (breaths/min)
    #[arg(long)]
    pub rr: Option<f64>,
}

impl VitalsArgs {
    pub fn to_vitals(&self) -> Vitals {
        Vitals {
            heart_rate: self.hr,
            blood_pressure: self.bp.clone(),
            oxygen_saturation: self.spo2,
            temperature: self.temp,
            respiratory_rate: self.rr,
        }
    }
}
