use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use vaxsched_core::*;

#[derive(Parser)]
#[command(name = "vaxsched")]
#[command(about = "Vaccine appointment scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Username for commands that need a signed-in account
    #[arg(long, global = true)]
    user: Option<String>,

    /// Password for --user
    #[arg(long = "password", global = true, value_name = "PASSWORD")]
    auth_password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a patient account
    CreatePatient { username: String, password: String },

    /// Register a caregiver account
    CreateCaregiver { username: String, password: String },

    /// Check a username and password
    Login { username: String, password: String },

    /// Show caregivers available on a date and vaccine stock
    Search {
        #[arg(value_parser = parse_date_arg)]
        date: NaiveDate,
    },

    /// Book an appointment (patients)
    Reserve {
        #[arg(value_parser = parse_date_arg)]
        date: NaiveDate,
        vaccine: String,
    },

    /// Declare availability on a date (caregivers)
    UploadAvailability {
        #[arg(value_parser = parse_date_arg)]
        date: NaiveDate,
    },

    /// Restock a vaccine (caregivers)
    AddDoses { vaccine: String, doses: u32 },

    /// List your appointments
    ShowAppointments,

    /// Write your appointments to a CSV file
    Export { output: PathBuf },
}

fn parse_date_arg(input: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(input).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    // Initialize logging
    vaxsched_core::logging::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_transient() {
                eprintln!("Please try again");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        command,
        data_dir,
        user,
        auth_password,
    } = cli;

    // Determine data directory
    let config = Config::load()?;
    let data_dir = data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let scheduler = Scheduler::new(FileStore::open(data_dir)?, config);
    let sign_in = || signed_in(&scheduler, user.as_deref(), auth_password.as_deref());

    match command {
        Commands::CreatePatient { username, password } => {
            cmd_create(&scheduler, Role::Patient, &username, &password)
        }
        Commands::CreateCaregiver { username, password } => {
            cmd_create(&scheduler, Role::Caregiver, &username, &password)
        }
        Commands::Login { username, password } => {
            let credential = scheduler.login(&username, &password)?;
            println!("Logged in as {} ({})", credential.username(), credential.role());
            Ok(())
        }
        Commands::Search { date } => {
            sign_in()?;
            cmd_search(&scheduler, date)
        }
        Commands::Reserve { date, vaccine } => cmd_reserve(&scheduler, &sign_in()?, date, &vaccine),
        Commands::UploadAvailability { date } => {
            scheduler.publish_availability(&sign_in()?, date)?;
            println!("Availability uploaded for {}", date);
            Ok(())
        }
        Commands::AddDoses { vaccine, doses } => {
            let total = scheduler.add_doses(&sign_in()?, &vaccine, doses)?;
            println!("Doses updated: {} now has {} available", vaccine, total);
            Ok(())
        }
        Commands::ShowAppointments => cmd_show_appointments(&scheduler, &sign_in()?),
        Commands::Export { output } => {
            let appointments = scheduler.list_appointments(&sign_in()?)?;
            let count = export_appointments(&appointments, &output)?;
            println!("Exported {} appointments to {}", count, output.display());
            Ok(())
        }
    }
}

fn signed_in(
    scheduler: &Scheduler<FileStore>,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<Credential> {
    match (user, password) {
        (Some(user), Some(password)) => scheduler.login(user, password),
        _ => Err(Error::InvalidInput(
            "this command needs --user and --password".into(),
        )),
    }
}

fn cmd_create(
    scheduler: &Scheduler<FileStore>,
    role: Role,
    username: &str,
    password: &str,
) -> Result<()> {
    scheduler.register(role, username, password)?;
    println!("Created {} {}", role, username);
    Ok(())
}

fn cmd_search(scheduler: &Scheduler<FileStore>, date: NaiveDate) -> Result<()> {
    let view = scheduler.search_schedule(date)?;

    if view.caregivers.is_empty() {
        println!("No caregivers available on {}", view.date);
    } else {
        println!("Caregivers available on {}:", view.date);
        for caregiver in &view.caregivers {
            println!("  {}", caregiver);
        }
    }

    if view.stock.is_empty() {
        println!("No vaccines in stock");
    } else {
        println!("Vaccines:");
        for stock in &view.stock {
            println!("  {} {}", stock.name, stock.doses);
        }
    }
    Ok(())
}

fn cmd_reserve(
    scheduler: &Scheduler<FileStore>,
    patient: &Credential,
    date: NaiveDate,
    vaccine: &str,
) -> Result<()> {
    match scheduler.reserve(patient, date, vaccine)? {
        BookingOutcome::Committed(booking) => {
            println!(
                "Appointment ID {}, Caregiver username {}",
                booking.reservation_id, booking.caregiver
            );
        }
        BookingOutcome::Rejected(reason) => println!("{}", reason),
    }
    Ok(())
}

fn cmd_show_appointments(scheduler: &Scheduler<FileStore>, user: &Credential) -> Result<()> {
    let appointments = scheduler.list_appointments(user)?;
    if appointments.is_empty() {
        println!("No appointments scheduled");
        return Ok(());
    }

    for appointment in &appointments {
        let counterpart = match user.role() {
            Role::Patient => &appointment.caregiver,
            Role::Caregiver => &appointment.patient,
        };
        println!(
            "{} {} {} {}",
            appointment.id, appointment.vaccine, appointment.date, counterpart
        );
    }
    Ok(())
}
