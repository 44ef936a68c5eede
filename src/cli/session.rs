use std::io::{BufRead, IsTerminal};

use crate::cli::connect;
use crate::cli::output::{print_login, print_status, report_session_events, OutputMode};
use crate::error::FarmgateError;

fn read_password() -> Result<String, FarmgateError> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("Password: ");
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(FarmgateError::InvalidArgument(
            "no password given (use --password, FARMGATE_PASSWORD or stdin)".into(),
        ));
    }
    Ok(password)
}

pub async fn run_login(
    config_path: Option<&str>,
    username: &str,
    password: Option<&str>,
) -> Result<(), FarmgateError> {
    let client = connect(config_path)?;
    let password = match password {
        Some(p) => p.to_string(),
        None => read_password()?,
    };
    let user = client.login(username, &password).await?;
    print_login(user.as_ref(), username);
    Ok(())
}

pub async fn run_logout(config_path: Option<&str>) -> Result<(), FarmgateError> {
    let client = connect(config_path)?;
    if client.current_tokens().is_none() {
        println!("Not logged in");
        return Ok(());
    }
    client.logout().await?;
    println!("Logged out");
    Ok(())
}

/// Show the persisted session without touching the network.
pub async fn run_status(config_path: Option<&str>, json: bool) -> Result<(), FarmgateError> {
    let client = connect(config_path)?;
    let mut events = client.session().subscribe();
    print_status(client.current_tokens().as_ref(), OutputMode::from_flag(json));
    report_session_events(&mut events);
    Ok(())
}
