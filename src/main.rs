use std::time::Duration;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use marketplace_onboard::config::OnboardingConfig;
use marketplace_onboard::error::FlowError;
use marketplace_onboard::onboarding::rules::is_valid_email;
use marketplace_onboard::onboarding::{
    AccountType, NotificationLevel, OnboardingStep, OtpMethod, PayloadUpdate, RegistrationFlow,
    Role, RoleProfile, UniquenessStatus,
};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env()?;
    let role = parse_role(std::env::args().nth(1).as_deref())?;

    eprintln!("Marketplace onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.api_base_url);
    eprintln!("   Role: {}", role);
    eprintln!("   Type 'b' at any prompt to go back.\n");

    let flow = RegistrationFlow::connect(role, config)?;

    let mut notes = flow.subscribe_notifications();
    tokio::spawn(async move {
        while let Ok(note) = notes.recv().await {
            let tag = match note.level {
                NotificationLevel::Success => "ok",
                NotificationLevel::Info => "info",
                NotificationLevel::Error => "error",
            };
            eprintln!("   [{tag}] {}", note.message);
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let step = flow.current_step().await;
        if step == OnboardingStep::Submitted {
            break;
        }
        eprintln!("── Step {} of 6: {}", step.number(), step);

        let back = match step {
            OnboardingStep::Identity => identity(&flow, role, &mut input).await?,
            OnboardingStep::Email => {
                let email = ask(&mut input, "Email").await?;
                if email == "b" {
                    true
                } else {
                    flow.input_email(&email).await;
                    settle_email(&flow).await;
                    false
                }
            }
            OnboardingStep::Phone => {
                let phone = ask(&mut input, "Phone (9 digits, starts with 7 or 1)").await?;
                if phone != "b" && !flow.input_phone(&phone).await {
                    eprintln!("   Phone number must start with 7 or 1 and have at most 9 digits");
                    continue;
                }
                phone == "b"
            }
            OnboardingStep::DeliveryMethod => {
                let method = ask(&mut input, "Send code by (email/phone)").await?;
                match method.as_str() {
                    "b" => true,
                    "email" => {
                        flow.select_otp_method(OtpMethod::Email).await;
                        false
                    }
                    "phone" => {
                        flow.select_otp_method(OtpMethod::Phone).await;
                        false
                    }
                    _ => continue,
                }
            }
            OnboardingStep::Verification => {
                let code = ask(&mut input, "Code ('r' to resend)").await?;
                match code.as_str() {
                    "b" => true,
                    "r" => {
                        if let Err(e) = flow.resend().await {
                            eprintln!("   {e}");
                        }
                        continue;
                    }
                    _ => {
                        // A complete code verifies and advances on its own
                        if let Some(Err(e)) = flow.input_otp(&code).await {
                            eprintln!("   {e}");
                        }
                        continue;
                    }
                }
            }
            OnboardingStep::Credentials => {
                let password = ask(&mut input, "Password").await?;
                if password == "b" {
                    flow.retreat().await?;
                    continue;
                }
                let confirm = ask(&mut input, "Confirm password").await?;
                let agree = ask(&mut input, "Agree to the terms? (y/n)").await?;
                flow.update(PayloadUpdate::credentials(&password, &confirm, agree == "y"))
                    .await;
                match flow.submit().await {
                    Ok(complete) => {
                        eprintln!("   Account created. Continue with your profile.");
                        println!("{}", serde_json::to_string_pretty(&complete.user)?);
                    }
                    Err(e) => report(e),
                }
                continue;
            }
            OnboardingStep::Submitted => break,
        };

        if back {
            if let Err(e) = flow.retreat().await {
                eprintln!("   {e}");
            }
        } else if let Err(e) = flow.advance().await {
            report(e);
        }
    }

    Ok(())
}

async fn identity(flow: &RegistrationFlow, role: Role, input: &mut Input) -> anyhow::Result<bool> {
    let kind = ask(input, "Account type (individual/organization)").await?;
    let mut update = PayloadUpdate::default();
    match kind.as_str() {
        "organization" => {
            update.account_type = Some(AccountType::Organization);
            update.organization_name = Some(ask(input, "Organization name").await?);
        }
        _ => {
            update.account_type = Some(AccountType::Individual);
            update.first_name = Some(ask(input, "First name").await?);
            update.last_name = Some(ask(input, "Last name").await?);
        }
    }

    update.profile = Some(match role {
        Role::Customer => RoleProfile::Customer,
        Role::Tradesperson => RoleProfile::Tradesperson {
            skill: ask(input, "Skill").await?,
        },
        Role::Professional => RoleProfile::Professional {
            profession: ask(input, "Profession").await?,
        },
        Role::Contractor => RoleProfile::Contractor {
            categories: split_list(&ask(input, "Categories (comma separated)").await?),
        },
        Role::HardwareSupplier => RoleProfile::HardwareSupplier {
            categories: split_list(&ask(input, "Categories (comma separated)").await?),
        },
    });
    flow.update(update).await;
    Ok(false)
}

/// Give the uniqueness check a chance to land before advancing.
async fn settle_email(flow: &RegistrationFlow) {
    let email = flow.payload().await.email;
    if !is_valid_email(&email) {
        return;
    }
    let mut rx = flow.subscribe_email_status();
    let settled = rx.wait_for(|s| matches!(s, UniquenessStatus::Available | UniquenessStatus::Taken));
    let _ = tokio::time::timeout(Duration::from_secs(3), settled).await;
}

async fn ask(input: &mut Input, prompt: &str) -> anyhow::Result<String> {
    eprint!("{prompt}: ");
    match input.next_line().await.context("reading stdin")? {
        Some(line) => Ok(line.trim().to_string()),
        None => bail!("input closed"),
    }
}

fn report(err: FlowError) {
    match err {
        FlowError::ValidationFailed { errors, .. } => {
            for (field, message) in errors.iter() {
                eprintln!("   {field}: {message}");
            }
        }
        // Remote failures were already shown as notifications
        FlowError::Service(_) => {}
        other => eprintln!("   {other}"),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_role(arg: Option<&str>) -> anyhow::Result<Role> {
    Ok(match arg.unwrap_or("customer") {
        "customer" => Role::Customer,
        "tradesperson" => Role::Tradesperson,
        "professional" => Role::Professional,
        "contractor" => Role::Contractor,
        "hardware_supplier" => Role::HardwareSupplier,
        other => bail!(
            "unknown role {other:?}; expected customer, tradesperson, professional, contractor or hardware_supplier"
        ),
    })
}
