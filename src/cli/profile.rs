use crate::args::parse_profile_patch;
use crate::cli::output::{print_profile, report_session_events, OutputMode};
use crate::cli::{connect, require_session};
use crate::error::FarmgateError;

pub async fn run_show(config_path: Option<&str>, json: bool) -> Result<(), FarmgateError> {
    let client = connect(config_path)?;
    require_session(&client)?;
    let mut events = client.session().subscribe();

    let result = client.fetch_profile().await;
    report_session_events(&mut events);
    print_profile(&result?, OutputMode::from_flag(json));
    Ok(())
}

pub async fn run_set(
    config_path: Option<&str>,
    fields: &[String],
    json: bool,
) -> Result<(), FarmgateError> {
    let patch = parse_profile_patch(fields)?;
    let client = connect(config_path)?;
    require_session(&client)?;
    let mut events = client.session().subscribe();

    // Load the current profile so the optimistic view has something to apply to.
    let result = match client.fetch_profile().await {
        Ok(_) => client.update_profile(patch).await,
        Err(e) => Err(e),
    };
    report_session_events(&mut events);
    match result? {
        Some(user) => print_profile(&user, OutputMode::from_flag(json)),
        None => println!("Profile updated"),
    }
    Ok(())
}
