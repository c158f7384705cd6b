mod auth;
mod codec;
mod config;
mod extract;
mod logger;
mod models;
mod portal;
mod storage;
mod store;
mod views;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use auth::{AuthError, Role, Session};
use config::AppConfig;
use models::{
    AnnouncementPost, Applicant, ApplicantStatus, Drive, DrivePatch, DriveStatus, NewDrive,
    ResultRow,
};
use portal::{ApplyOutcome, Portal};
use storage::Storage;
use store::Family;
use views::{SortDirection, StatusFilter};

#[derive(Parser)]
#[command(name = "placement")]
#[command(about = "Campus placement portal - drives, applicants, results and announcements")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with a college email (officers also pass --password)
    Login {
        email: String,

        /// Placement officer password
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and forget everything from this session
    Logout,

    /// Show who is signed in
    Whoami,

    /// Dashboard totals and the next deadlines
    Overview,

    /// Placement drives
    Drive {
        #[command(subcommand)]
        command: DriveCommands,
    },

    /// Applicants of a drive (officers only)
    Applicants {
        #[command(subcommand)]
        command: ApplicantCommands,
    },

    /// Results of a drive
    Results {
        #[command(subcommand)]
        command: ResultCommands,
    },

    /// Announcements of a drive
    Announce {
        #[command(subcommand)]
        command: AnnounceCommands,
    },

    /// Apply to an open drive (students only)
    Apply {
        /// Drive ID
        drive_id: String,
    },

    /// Check whether you applied to a drive this session
    Applied {
        /// Drive ID
        drive_id: String,
    },

    /// List the drives you applied to this session
    Applications,
}

#[derive(Subcommand)]
enum DriveCommands {
    /// List drives
    List {
        /// Match company or role
        #[arg(short, long)]
        search: Option<String>,

        /// Filter by status (all, open, closed, draft)
        #[arg(long, default_value = "all")]
        status: StatusFilter<DriveStatus>,

        /// Order by deadline (asc, desc)
        #[arg(long)]
        sort: Option<SortDirection>,
    },

    /// Show drive details
    Show {
        /// Drive ID
        id: String,
    },

    /// Create a drive
    Add {
        company: String,
        role: String,
        package: String,

        /// Application deadline (YYYY-MM-DD)
        deadline: NaiveDate,

        #[arg(long, default_value = "open")]
        status: DriveStatus,

        #[arg(short, long)]
        description: Option<String>,

        /// One requirement per line
        #[arg(short, long)]
        requirements: Option<String>,
    },

    /// Change some fields of a drive
    Edit {
        /// Drive ID
        id: String,

        #[arg(long)]
        company: Option<String>,

        #[arg(long)]
        role: Option<String>,

        #[arg(long)]
        package: Option<String>,

        #[arg(long)]
        deadline: Option<NaiveDate>,

        #[arg(long)]
        applicants: Option<u32>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        requirements: Option<String>,
    },

    /// Set a drive's status (open, closed, draft)
    Status {
        /// Drive ID
        id: String,
        status: DriveStatus,
    },

    /// Delete a drive with its applicants, results and announcements
    Delete {
        /// Drive ID
        id: String,
    },

    /// Drives with the nearest deadlines
    Upcoming {
        #[arg(short, long, default_value = "3")]
        limit: usize,
    },

    /// Prefill a drive from a job description (file, --text, or stdin)
    Extract {
        /// Text file with the job description
        file: Option<PathBuf>,

        #[arg(short, long)]
        text: Option<String>,

        /// Create the drive instead of only printing it
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
enum ApplicantCommands {
    /// List a drive's applicants
    List {
        /// Drive ID
        drive_id: String,

        /// Match name or branch
        #[arg(short, long)]
        search: Option<String>,

        /// Filter by status (all, Applied, Shortlisted, Selected, Rejected)
        #[arg(long, default_value = "all")]
        status: StatusFilter<ApplicantStatus>,
    },

    /// Set one applicant's status
    Status {
        drive_id: String,
        applicant_id: String,
        status: ApplicantStatus,
    },

    /// Set every applicant's status
    Bulk {
        drive_id: String,
        status: ApplicantStatus,
    },

    /// Replace the applicants with a CSV file (id,name,branch,cgpa,status)
    Import { drive_id: String, file: PathBuf },

    /// Write the applicants to applicants_<company>.csv
    Export {
        drive_id: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum ResultCommands {
    /// List a drive's results
    List {
        drive_id: String,

        #[arg(short, long)]
        search: Option<String>,

        /// Filter by status (all, Selected, Rejected, Waitlisted)
        #[arg(long, default_value = "all")]
        status: StatusFilter<models::ResultStatus>,
    },

    /// Set one result's status
    Status {
        drive_id: String,
        result_id: String,
        status: models::ResultStatus,
    },

    /// Replace the results with a CSV file (id,name,status)
    Import { drive_id: String, file: PathBuf },

    /// Write the results to results_<company>.csv
    Export {
        drive_id: String,

        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum AnnounceCommands {
    /// Post an announcement with text, a .pdf/.txt attachment, or both
    Post {
        drive_id: String,

        #[arg(short, long, default_value = "")]
        text: String,

        #[arg(short, long)]
        attach: Option<PathBuf>,
    },

    /// List a drive's announcements
    List {
        drive_id: String,

        /// Order by date (asc, desc); newest first when omitted
        #[arg(long)]
        sort: Option<SortDirection>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init_logging();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let storage = match &config.db_path {
        Some(path) => Storage::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?,
        None => Storage::in_memory(),
    };
    let portal = Portal::new(&storage);

    match cli.command {
        Commands::Login { email, password } => {
            let session = auth::sign_in(&storage, &config, &email, password.as_deref(), Utc::now())?;
            println!("Signed in as {} ({}).", session.email, session.role);
            println!("Session expires at {}.", session.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
        }

        Commands::Logout => {
            auth::sign_out(&storage);
            println!("Signed out.");
        }

        Commands::Whoami => match auth::current_session(&storage, Utc::now()) {
            Some(session) => println!("{} ({})", session.email, session.role),
            None => println!("Not signed in."),
        },

        Commands::Overview => {
            signed_in(&storage)?;
            let drives = portal.drives();
            let stats = views::overview(&drives);
            println!("Open drives:      {}", stats.open_drives);
            println!("Total applicants: {}", stats.total_applicants);
            println!("Total drives:     {}", stats.total_drives);

            let next = views::upcoming(&drives, today(), 3);
            if !next.is_empty() {
                println!("\nUpcoming deadlines:");
                for drive in next {
                    println!("  {}  {} - {}", drive.deadline, drive.company_name, drive.role);
                }
            }
        }

        Commands::Drive { command } => run_drive(&portal, &storage, &config, command)?,

        Commands::Applicants { command } => {
            require(&storage, Role::Officer)?;
            run_applicants(&portal, command)?;
        }

        Commands::Results { command } => run_results(&portal, &storage, command)?,

        Commands::Announce { command } => match command {
            AnnounceCommands::Post { drive_id, text, attach } => {
                require(&storage, Role::Officer)?;
                find_drive(&portal, &drive_id)?;
                let attachment = attach.as_deref().map(portal::load_attachment).transpose()?;
                let post = portal.post_announcement(&drive_id, &text, attachment, Utc::now())?;
                println!("Posted announcement #{}", post.id);
            }

            AnnounceCommands::List { drive_id, sort } => {
                signed_in(&storage)?;
                let drive = find_drive(&portal, &drive_id)?;
                let mut posts = portal.announcements(&drive_id);
                if let Some(direction) = sort {
                    posts = views::sort_by_date(&posts, direction);
                }
                if posts.is_empty() {
                    println!("No announcements for {}.", drive.company_name);
                } else {
                    for post in &posts {
                        print_post(post);
                    }
                }
            }
        },

        Commands::Apply { drive_id } => {
            require(&storage, Role::Student)?;
            match portal.mark_applied(&drive_id, Utc::now())? {
                ApplyOutcome::Applied(_) => println!("Applied to drive #{}.", drive_id),
                ApplyOutcome::AlreadyApplied(at) => println!(
                    "Already applied to drive #{} on {}.",
                    drive_id,
                    at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                ),
                ApplyOutcome::NotOpen(status) => {
                    bail!("Drive #{} is {} and not accepting applications", drive_id, status)
                }
            }
        }

        Commands::Applied { drive_id } => {
            require(&storage, Role::Student)?;
            let marker = portal.application_marker(&drive_id);
            match marker.applied_at {
                Some(at) if marker.applied() => {
                    println!("Applied on {}.", at.with_timezone(&Local).format("%Y-%m-%d %H:%M"))
                }
                _ => println!("Not applied to drive #{}.", marker.drive_id),
            }
        }

        Commands::Applications => {
            require(&storage, Role::Student)?;
            let applied = portal.applications();
            if applied.is_empty() {
                println!("No applications this session.");
            } else {
                println!("{:<14} {:<20} {:<24} {:<17}", "ID", "COMPANY", "ROLE", "APPLIED");
                println!("{}", "-".repeat(78));
                for app in applied {
                    println!(
                        "{:<14} {:<20} {:<24} {:<17}",
                        app.drive.id,
                        truncate(&app.drive.company_name, 18),
                        truncate(&app.drive.role, 22),
                        app.applied_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
    }

    Ok(())
}

fn run_drive(portal: &Portal, storage: &Storage, config: &AppConfig, command: DriveCommands) -> Result<()> {
    match command {
        DriveCommands::List { search, status, sort } => {
            signed_in(storage)?;
            let mut drives = portal.drives();
            if let Some(query) = search {
                drives = views::search(&drives, &query);
            }
            drives = views::filter_status(&drives, status);
            if let Some(direction) = sort {
                drives = views::sort_by_date(&drives, direction);
            }
            print_drives(&drives);
        }

        DriveCommands::Show { id } => {
            signed_in(storage)?;
            let drive = find_drive(portal, &id)?;
            println!("Drive #{}", drive.id);
            println!("Company: {}", drive.company_name);
            println!("Role: {}", drive.role);
            println!("Package: {}", drive.package);
            println!("Deadline: {}", drive.deadline);
            println!("Status: {}", drive.status);
            println!("Applicants: {}", drive.applicant_count);
            if let Some(description) = &drive.description {
                println!("\n--- Description ---\n{}", textwrap::fill(description, 80));
            }
            if let Some(requirements) = &drive.requirements {
                println!("\n--- Requirements ---");
                for line in requirements.lines().filter(|l| !l.trim().is_empty()) {
                    println!("{}", textwrap::fill(line.trim(), textwrap::Options::new(80).initial_indent("  - ").subsequent_indent("    ")));
                }
            }
        }

        DriveCommands::Add {
            company,
            role,
            package,
            deadline,
            status,
            description,
            requirements,
        } => {
            require(storage, Role::Officer)?;
            let drive = portal.create_drive(
                NewDrive {
                    company_name: company,
                    role,
                    package,
                    deadline,
                    status,
                    description,
                    requirements,
                },
                Utc::now(),
            );
            println!("Added drive #{} ({})", drive.id, drive.company_name);
        }

        DriveCommands::Edit {
            id,
            company,
            role,
            package,
            deadline,
            applicants,
            description,
            requirements,
        } => {
            require(storage, Role::Officer)?;
            let patch = DrivePatch {
                company_name: company,
                role,
                package,
                deadline,
                status: None,
                applicant_count: applicants,
                description,
                requirements,
            };
            let drive = portal
                .update_drive(&id, patch)
                .ok_or_else(|| anyhow!("Drive #{} not found", id))?;
            println!("Updated drive #{} ({})", drive.id, drive.company_name);
        }

        DriveCommands::Status { id, status } => {
            require(storage, Role::Officer)?;
            let drive = portal
                .set_drive_status(&id, status)
                .ok_or_else(|| anyhow!("Drive #{} not found", id))?;
            println!("Drive #{} is now {}.", drive.id, drive.status);
        }

        DriveCommands::Delete { id } => {
            require(storage, Role::Officer)?;
            let report = portal
                .delete_drive(&id)
                .ok_or_else(|| anyhow!("Drive #{} not found", id))?;
            println!(
                "Deleted drive #{} ({}) and {} related record set(s)",
                report.drive.id, report.drive.company_name, report.children_removed
            );
            if report.children_failed > 0 || !report.list_persisted {
                println!(
                    "  Warning: {} related record set(s) could not be removed from storage.",
                    report.children_failed + usize::from(!report.list_persisted)
                );
            }
        }

        DriveCommands::Upcoming { limit } => {
            signed_in(storage)?;
            print_drives(&views::upcoming(&portal.drives(), today(), limit));
        }

        DriveCommands::Extract { file, text, save } => {
            require(storage, Role::Officer)?;
            let raw_text = match (file, text) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, Some(text)) => text,
                (None, None) => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read job description from stdin")?;
                    buf
                }
            };

            let extracted = extract_drive(config, raw_text)?;
            let new_drive = extracted.into_new_drive(today() + chrono::Duration::days(30));

            println!("Company:  {}", new_drive.company_name);
            println!("Role:     {}", new_drive.role);
            println!("Package:  {}", new_drive.package);
            println!("Deadline: {}", new_drive.deadline);
            if let Some(description) = &new_drive.description {
                println!("\n{}", textwrap::fill(description, 80));
            }
            if let Some(requirements) = &new_drive.requirements {
                println!();
                for line in requirements.lines() {
                    println!("  - {}", line);
                }
            }

            if save {
                let drive = portal.create_drive(new_drive, Utc::now());
                println!("\nAdded drive #{}", drive.id);
            }
        }
    }
    Ok(())
}

fn run_applicants(portal: &Portal, command: ApplicantCommands) -> Result<()> {
    match command {
        ApplicantCommands::List { drive_id, search, status } => {
            let drive = find_drive(portal, &drive_id)?;
            let mut applicants = portal.applicants(&drive_id);
            if let Some(query) = search {
                applicants = views::search(&applicants, &query);
            }
            applicants = views::filter_status(&applicants, status);
            println!("{} - {}\n", drive.company_name, drive.role);
            print_applicants(&applicants);
        }

        ApplicantCommands::Status { drive_id, applicant_id, status } => {
            find_drive(portal, &drive_id)?;
            portal
                .set_applicant_status(&drive_id, &applicant_id, status)
                .ok_or_else(|| anyhow!("Applicant '{}' not found in drive #{}", applicant_id, drive_id))?;
            println!("Marked applicant '{}' as {}.", applicant_id, status);
        }

        ApplicantCommands::Bulk { drive_id, status } => {
            find_drive(portal, &drive_id)?;
            let updated = portal.bulk_applicant_status(&drive_id, status);
            println!("Marked {} applicant(s) as {}.", updated.len(), status);
        }

        ApplicantCommands::Import { drive_id, file } => {
            find_drive(portal, &drive_id)?;
            let text = portal::read_csv_file(&file)?;
            let rows = portal.import_applicants_csv(&drive_id, &text)?;
            println!("Imported {} applicant(s) into drive #{}.", rows.len(), drive_id);
            if rows.is_empty() {
                println!("  Expected header: {}", portal::csv_headers::<Applicant>());
            }
        }

        ApplicantCommands::Export { drive_id, out } => {
            let drive = find_drive(portal, &drive_id)?;
            let csv = portal.export_applicants_csv(&drive_id)?;
            let path = write_export(&out, Family::Applicants, &drive, &csv)?;
            println!("Exported applicants to {}", path.display());
        }
    }
    Ok(())
}

fn run_results(portal: &Portal, storage: &Storage, command: ResultCommands) -> Result<()> {
    match command {
        ResultCommands::List { drive_id, search, status } => {
            signed_in(storage)?;
            let drive = find_drive(portal, &drive_id)?;
            let mut results = portal.results(&drive_id);
            if let Some(query) = search {
                results = views::search(&results, &query);
            }
            results = views::filter_status(&results, status);
            println!("{} - {}\n", drive.company_name, drive.role);
            print_results(&results);
        }

        ResultCommands::Status { drive_id, result_id, status } => {
            require(storage, Role::Officer)?;
            find_drive(portal, &drive_id)?;
            portal
                .set_result_status(&drive_id, &result_id, status)
                .ok_or_else(|| anyhow!("Result '{}' not found in drive #{}", result_id, drive_id))?;
            println!("Marked result '{}' as {}.", result_id, status);
        }

        ResultCommands::Import { drive_id, file } => {
            require(storage, Role::Officer)?;
            find_drive(portal, &drive_id)?;
            let text = portal::read_csv_file(&file)?;
            let rows = portal.import_results_csv(&drive_id, &text)?;
            println!("Imported {} result(s) into drive #{}.", rows.len(), drive_id);
            if rows.is_empty() {
                println!("  Expected header: {}", portal::csv_headers::<ResultRow>());
            }
        }

        ResultCommands::Export { drive_id, out } => {
            require(storage, Role::Officer)?;
            let drive = find_drive(portal, &drive_id)?;
            let csv = portal.export_results_csv(&drive_id)?;
            let path = write_export(&out, Family::Results, &drive, &csv)?;
            println!("Exported results to {}", path.display());
        }
    }
    Ok(())
}

/// Runs the configured extractor on a small runtime; Ctrl-C cancels it.
fn extract_drive(config: &AppConfig, raw_text: String) -> Result<extract::ExtractedDrive> {
    let extractor = extract::create_extractor(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start extraction runtime")?;

    println!("Extracting with {}...", extractor.name());
    let outcome = runtime.block_on(extract::run_extraction(
        extractor,
        raw_text,
        config.extract_timeout,
        async {
            if tokio::signal::ctrl_c().await.is_err() {
                // no signal handler; never cancel
                std::future::pending::<()>().await;
            }
        },
    ));
    // an abandoned provider call must not hold the process open
    runtime.shutdown_timeout(Duration::from_millis(100));

    Ok(outcome?)
}

fn signed_in(storage: &Storage) -> Result<Session, AuthError> {
    auth::current_session(storage, Utc::now()).ok_or(AuthError::Unauthenticated)
}

fn require(storage: &Storage, role: Role) -> Result<Session, AuthError> {
    auth::require_role(storage, Utc::now(), role)
}

fn find_drive(portal: &Portal, id: &str) -> Result<Drive> {
    portal
        .drive(id)
        .ok_or_else(|| anyhow!("Drive #{} not found", id))
}

fn write_export(dir: &Path, family: Family, drive: &Drive, csv: &str) -> Result<PathBuf> {
    let path = dir.join(portal::export_file_name(family, &drive.company_name));
    std::fs::write(&path, csv).with_context(|| format!("Failed to write to {}", path.display()))?;
    Ok(path)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn print_drives(drives: &[Drive]) {
    if drives.is_empty() {
        println!("No drives found.");
        return;
    }
    println!(
        "{:<14} {:<8} {:<20} {:<24} {:<12} {:>10}",
        "ID", "STATUS", "COMPANY", "ROLE", "DEADLINE", "APPLICANTS"
    );
    println!("{}", "-".repeat(93));
    for drive in drives {
        println!(
            "{:<14} {:<8} {:<20} {:<24} {:<12} {:>10}",
            drive.id,
            drive.status,
            truncate(&drive.company_name, 18),
            truncate(&drive.role, 22),
            drive.deadline,
            drive.applicant_count
        );
    }
}

fn print_applicants(applicants: &[Applicant]) {
    if applicants.is_empty() {
        println!("No applicants found.");
        return;
    }
    println!("{:<12} {:<24} {:<8} {:>5}  {:<12}", "ID", "NAME", "BRANCH", "CGPA", "STATUS");
    println!("{}", "-".repeat(66));
    for a in applicants {
        println!(
            "{:<12} {:<24} {:<8} {:>5.1}  {:<12}",
            truncate(&a.id, 12),
            truncate(&a.name, 22),
            truncate(&a.branch, 8),
            a.cgpa,
            a.status
        );
    }
}

fn print_results(results: &[ResultRow]) {
    if results.is_empty() {
        println!("No results published.");
        return;
    }
    println!("{:<12} {:<28} {:<12}", "ID", "NAME", "STATUS");
    println!("{}", "-".repeat(54));
    for r in results {
        println!("{:<12} {:<28} {:<12}", truncate(&r.id, 12), truncate(&r.name, 26), r.status);
    }
}

fn print_post(post: &AnnouncementPost) {
    println!(
        "#{}  {}",
        post.id,
        post.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    if !post.text.is_empty() {
        println!("{}", textwrap::indent(&textwrap::fill(&post.text, 76), "  "));
    }
    if let Some(name) = &post.file_name {
        let size = post.file_data_url.as_ref().map(|u| u.len()).unwrap_or(0);
        println!("  [attachment: {} ({} bytes encoded)]", name, size);
    }
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
