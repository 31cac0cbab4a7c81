use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use leadflow::config::DistributionConfig;
use leadflow::distribution::{
    DistributionError, DistributionPlan, JobStatus, JobStore, LeadRepository, LeadSubmission,
    LenderDirective, LenderId, RepositoryError, RuleStore, RuleStoreError,
};
use leadflow::error::AppError;

use crate::infra::{build_engine, Engine};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Number of rows to generate for the bulk ingestion portion of the demo
    #[arg(long, default_value_t = 12)]
    pub(crate) bulk_rows: usize,
}

/// Rule store used by the demo: immediate fan-out plus a zero-minute delayed
/// directive so the delayed path completes while the demo is watching.
struct DemoRuleStore;

impl RuleStore for DemoRuleStore {
    fn find_active_rules(
        &self,
        _source: &str,
    ) -> Result<Option<DistributionPlan>, RuleStoreError> {
        Ok(Some(DistributionPlan {
            immediate: vec![
                LenderDirective::immediate(LenderId::Sml),
                LenderDirective::immediate(LenderId::LoanStar),
                LenderDirective::immediate(LenderId::CreditNest),
            ],
            delayed: vec![LenderDirective::delayed(LenderId::FastFunds, 0)],
        }))
    }
}

fn demo_config() -> DistributionConfig {
    DistributionConfig {
        settle_delay: Duration::from_secs(1),
        db_batch_size: 5,
        lender_batch_size: 2,
        lender_concurrency: 2,
        lender_batch_delay: Duration::from_millis(100),
        ..DistributionConfig::default()
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    println!("Lead distribution demo");
    println!("======================\n");

    let engine = build_engine(&demo_config(), Arc::new(DemoRuleStore));

    run_intake_demo(&engine).await;
    run_bulk_demo(&engine, args.bulk_rows.max(1)).await?;

    Ok(())
}

async fn run_intake_demo(engine: &Engine) {
    println!("Single-lead intake");

    let submission = LeadSubmission {
        source: "sml".to_string(),
        full_name: "Naledi Khumalo".to_string(),
        phone: "+27821230001".to_string(),
        national_id: "9202204800086".to_string(),
        email: Some("naledi@example.net".to_string()),
        employer: Some("Highveld Freight".to_string()),
        gross_monthly_income: Some(24_000),
        consent: true,
    };

    let lead = match engine.service.submit(submission.clone()) {
        Ok(lead) => lead,
        Err(err) => {
            println!("  Submission rejected: {err}");
            return;
        }
    };
    println!("  Accepted {} from source '{}'", lead.lead_id, lead.source);

    match engine.service.submit(submission) {
        Err(DistributionError::Repository(RepositoryError::DuplicateIdentity)) => {
            println!("  Resubmission rejected: duplicate phone/identity number");
        }
        Err(err) => println!("  Resubmission rejected: {err}"),
        Ok(_) => println!("  Resubmission unexpectedly accepted"),
    }

    // give the immediate pass, the zero-minute delayed directive, and the
    // settle-delay aggregation time to run
    tokio::time::sleep(Duration::from_secs(2)).await;

    match engine.leads.fetch(&lead.lead_id) {
        Ok(Some(stored)) => {
            let lenders: Vec<&str> = stored
                .immediate_successful_lenders
                .iter()
                .map(|lender| lender.as_str())
                .collect();
            println!("  Immediate successes: {lenders:?}");
        }
        _ => println!("  Lead vanished from the store"),
    }

    match engine.successes.snapshot(&lead.lead_id) {
        Some(success) => {
            let accepted: Vec<&str> = success
                .successful_lenders()
                .iter()
                .map(|lender| lender.as_str())
                .collect();
            println!("  Aggregated acceptances: {accepted:?}\n");
        }
        None => println!("  No aggregation pass has landed yet\n"),
    }
}

async fn run_bulk_demo(engine: &Engine, rows: usize) -> Result<(), AppError> {
    println!("Bulk ingestion ({rows} rows, one duplicate)");

    let mut lines = vec![
        "full_name,phone,national_id,email,employer,gross_monthly_income,consent".to_string(),
    ];
    for index in 0..rows {
        lines.push(format!(
            "Bulk Lead {index},+27839{index:06},bulk-nid-{index:06},,,15000,true"
        ));
    }
    // repeat the first row so the job report shows a per-row failure
    lines.push("Bulk Duplicate,+27839000000,bulk-nid-other,,,9000,true".to_string());

    let path = std::env::temp_dir().join(format!("leadflow-demo-{}.csv", std::process::id()));
    tokio::fs::write(&path, lines.join("\n")).await?;

    let job_id = engine.pipeline.ingest(
        path,
        vec![LenderId::LoanStar, LenderId::CreditNest, LenderId::FastFunds],
        "partner-web".to_string(),
    );
    println!("  Accepted as {job_id}");

    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let Ok(Some(job)) = engine.jobs.fetch(&job_id) else {
            continue;
        };
        if job.status == JobStatus::Processing {
            continue;
        }

        println!("  Status: {}", job.status.label());
        println!(
            "  Rows: {} total, {} saved, {} failed",
            job.total_leads, job.successful_leads, job.failed_leads
        );
        for (lender, summary) in &job.lender_summaries {
            println!(
                "    {}: {} dispatched, {} accepted",
                lender.as_str(),
                summary.dispatched,
                summary.successful
            );
        }
        if !job.errors.is_empty() {
            println!("  Sampled row failures:");
            for error in &job.errors {
                println!("    - {error}");
            }
        }
        return Ok(());
    }

    println!("  Job did not finish within the demo window");
    Ok(())
}
