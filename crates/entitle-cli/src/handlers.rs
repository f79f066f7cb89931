//! Command handlers.

use crate::config::CliConfig;
use console::style;
use entitle_core::config::LicensingConfig;
use entitle_core::license::{License, key_prefix};
use entitle_core::ports::LicenseStore;
use entitle_core::validation::ValidationResult;
use entitle_licensing::{ActivationOutcome, LicensingContext, StartupDecision, TrialStatus};
use serde::Serialize;
use std::process::ExitCode;

pub type HandlerResult = Result<ExitCode, Box<dyn std::error::Error>>;

fn emit<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn mark(ok: bool) -> console::StyledObject<&'static str> {
    if ok { style("✓").green() } else { style("✗").red() }
}

fn print_license(license: &License) {
    println!("  key: {}…", license.key_prefix());
    println!("  customer: {}", license.customer_email);
    println!("  product: {}", license.product_type);
    println!("  status: {}", license.status);
    match license.expires_at {
        Some(at) => println!("  expires: {}", at.format("%Y-%m-%d %H:%M UTC")),
        None => println!("  expires: {}", style("never").dim()),
    }
    if !license.features.is_empty() {
        let features: Vec<&str> = license.features.iter().map(String::as_str).collect();
        println!("  features: {}", features.join(", "));
    }
    if let Some(at) = license.last_validated_at {
        println!("  last validated: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
}

/// Launch decision for this installation.
pub async fn status(ctx: &LicensingContext, json: bool) -> HandlerResult {
    let decision: StartupDecision = ctx.startup().await;
    if json {
        emit(&decision)?;
        return Ok(exit_code(decision.allows_launch()));
    }

    println!(
        "{} {:?} ({:?}, {})",
        mark(decision.allows_launch()),
        decision.action,
        decision.state,
        if decision.online { "online" } else { "offline" }
    );
    if let Some(days) = decision.days_remaining {
        println!("  days remaining: {}", days);
    }
    if let Some(message) = &decision.message {
        println!("  {}", style(message).yellow());
    }
    if let Some(license) = &decision.license {
        print_license(license);
    }
    Ok(exit_code(decision.allows_launch()))
}

/// Validate a key.
pub async fn validate(ctx: &LicensingContext, key: &str, strict: bool, online: bool, json: bool) -> HandlerResult {
    let result: ValidationResult = ctx.validate(key, strict, online).await;
    if json {
        emit(&result)?;
        return Ok(exit_code(result.valid));
    }

    println!(
        "{} License {:?} (source: {})",
        mark(result.valid),
        result.status,
        style(result.validation_source).bold()
    );
    for check in &result.checks_performed {
        println!("    {} {}", mark(result.passed(*check)), check);
    }
    for warning in &result.warnings {
        println!("  {} {}", style("!").yellow(), warning);
    }
    for error in &result.errors {
        println!("  {} {}", style("error").red(), style(error).dim());
    }
    if let Some(license) = &result.license_data {
        print_license(license);
    }
    Ok(exit_code(result.valid))
}

/// Activate a key on this machine.
pub async fn activate(ctx: &LicensingContext, key: &str, offline: bool, json: bool) -> HandlerResult {
    let outcome: ActivationOutcome = ctx.activate(key, offline).await;
    if json {
        emit(&outcome)?;
        return Ok(exit_code(outcome.success));
    }

    println!(
        "{} {} (source: {})",
        mark(outcome.success),
        style(outcome.activation_status).bold(),
        outcome.validation_source
    );
    if let Some(error) = &outcome.error {
        println!("  {}", style(error).red());
    }
    if let Some(existing) = &outcome.existing_activation {
        println!("  held by machine {}", existing.fingerprint_hint);
        if let Some(at) = existing.activated_at {
            println!("  since {}", at.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    if outcome.retryable {
        println!("  {} Retry once the license server is reachable", style("i").blue());
    }
    if let Some(license) = &outcome.data {
        print_license(license);
    }
    Ok(exit_code(outcome.success))
}

/// Trial status for this machine, starting one if eligible.
pub async fn trial(ctx: &LicensingContext, json: bool) -> HandlerResult {
    let status: TrialStatus = ctx.trial().await;
    if json {
        emit(&status)?;
        return Ok(exit_code(status.is_usable()));
    }

    println!(
        "{} {:?} license, {:?} (source: {})",
        mark(status.is_usable()),
        status.license_type,
        status.status,
        status.source
    );
    if let Some(days) = status.days_left {
        println!("  days left: {}", days);
    }
    if let Some(message) = &status.message {
        println!("  {}", style(message).yellow());
    }
    Ok(exit_code(status.is_usable()))
}

/// This machine's fingerprint.
pub fn fingerprint(ctx: &LicensingContext, json: bool) -> HandlerResult {
    let identity = ctx.identity();
    if json {
        emit(&serde_json::json!({
            "fingerprint": identity.fingerprint(),
            "machine": identity.info(),
            "complete": identity.info().is_complete(),
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", style(identity.fingerprint()).bold());
    println!("  host: {}", identity.hostname());
    println!("  os: {}", identity.info().os_label());
    if !identity.info().is_complete() {
        println!(
            "  {} Some machine attributes were unavailable; fingerprint uses the hostname only",
            style("!").yellow()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// License counts.
pub async fn stats(ctx: &LicensingContext, json: bool) -> HandlerResult {
    let stats = ctx.store().license_statistics().await?;
    if json {
        emit(&stats)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("Licenses: {}", style(stats.total).bold());
    println!("  active: {}", stats.active);
    println!("  expired: {}", stats.expired);
    Ok(ExitCode::SUCCESS)
}

/// Show a license and its active machines.
pub async fn show_license(ctx: &LicensingContext, key: Option<&str>, json: bool) -> HandlerResult {
    let license = match key {
        Some(key) => ctx.store().get_license_by_key(key.trim()).await?,
        None => ctx.store().get_latest_license().await?,
    };
    let Some(license) = license else {
        println!("{} No license found", style("i").blue());
        return Ok(ExitCode::FAILURE);
    };

    let activations = ctx.store().active_activations(license.id).await?;
    let expiry = ctx.store().check_expiry(&license);
    if json {
        emit(&serde_json::json!({
            "license": license,
            "expiry": expiry,
            "activations": activations,
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    print_license(&license);
    match (expiry.days_remaining, expiry.days_expired) {
        (Some(days), _) => println!("  days remaining: {}", days),
        (None, Some(days)) => println!("  {}", style(format!("expired {} day(s) ago", days)).red()),
        (None, None) => {}
    }
    println!("  activations: {}", activations.len());
    for activation in &activations {
        let this = activation.machine_fingerprint == ctx.identity().fingerprint();
        println!(
            "    - {} {}{}",
            activation.fingerprint_hint(),
            activation.activation_time.format("%Y-%m-%d %H:%M UTC"),
            if this { " (this machine)" } else { "" }
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Override a license's local status.
pub async fn set_license_status(ctx: &LicensingContext, key: &str, status: &str) -> HandlerResult {
    if ctx.store().update_license_status(key.trim(), status).await? {
        println!("{} Status set to {}", style("✓").green(), style(status).bold());
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{} No license updated (unknown key or status {:?})",
            style("!").yellow(),
            status
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Release this machine's activation of `key`.
pub async fn deactivate(ctx: &LicensingContext, key: &str) -> HandlerResult {
    let Some(license) = ctx.store().get_license_by_key(key.trim()).await? else {
        println!("{} No license found", style("i").blue());
        return Ok(ExitCode::FAILURE);
    };

    if ctx
        .store()
        .deactivate(license.id, ctx.identity().fingerprint())
        .await?
    {
        println!("{} Deactivated on this machine", style("✓").green());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} License is not active on this machine", style("i").blue());
        Ok(ExitCode::FAILURE)
    }
}

/// Delete a license and its activations.
pub async fn remove_license(ctx: &LicensingContext, key: &str, yes: bool) -> HandlerResult {
    use dialoguer::Confirm;

    let key = key.trim();
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete license {}… and its activations?", key_prefix(key)))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{} Cancelled", style("!").yellow());
            return Ok(ExitCode::SUCCESS);
        }
    }

    if ctx.store().delete_license(key).await? {
        println!("{} License removed", style("✓").green());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} No license found", style("i").blue());
        Ok(ExitCode::FAILURE)
    }
}

/// Show configuration.
pub fn show_config(config: &CliConfig, licensing: &LicensingConfig, json: bool) -> HandlerResult {
    let mut effective = licensing.clone();
    if effective.cloud.api_token.is_some() {
        effective.cloud.api_token = Some("***".to_string());
    }
    if json {
        emit(&effective)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("Current configuration:");
    println!("  database_url: {}", effective.database_url);
    println!("  api_url: {}", effective.cloud.api_url);
    println!(
        "  api_token: {}",
        effective.cloud.api_token.as_deref().unwrap_or("(not set)")
    );
    println!("  grace_period_days: {}", effective.grace_period_days);
    println!("  expiry_warning_days: {}", effective.expiry_warning_days);
    println!(
        "  timeouts: probe {}ms, request {}ms, {} retries",
        effective.cloud.probe_timeout_ms, effective.cloud.request_timeout_ms, effective.cloud.max_retries
    );
    println!("  output_format: {:?}", config.output_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> HandlerResult {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    let shown = if key == "api_token" { "***" } else { value };
    println!("{} Set {} = {}", style("✓").green(), key, shown);
    Ok(ExitCode::SUCCESS)
}
