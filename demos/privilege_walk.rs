use std::error::Error;
use std::time::Duration;

use vtyshell::endpoint::{Credentials, Endpoint};
use vtyshell::session::{ChannelOptions, Connection, SessionOptions, platform};

fn print_results(results: &[vtyshell::result::CommandResult]) {
    for result in results {
        println!("$ {}", result.input);
        println!("{}", result.raw_output);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.1".to_string());
    let user = std::env::var("VTYSHELL_USER").unwrap_or_else(|_| "admin".to_string());
    let password = std::env::var("VTYSHELL_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let enable_secret = std::env::var("VTYSHELL_ENABLE_SECRET").ok();

    let endpoint = Endpoint::new(&host, 22, Duration::from_secs(10));
    let mut credentials = Credentials::password(&user, &password);
    if let Some(secret) = enable_secret {
        credentials = credentials.with_secondary_password(secret);
    }

    let mut channel_options = ChannelOptions::default();
    channel_options.prompt_regex = r"[a-z0-9.\-@()/:]{1,32}[#>]\s*$".to_string();

    let mut connection = Connection::with_privilege_table(
        endpoint,
        credentials,
        SessionOptions::default(),
        channel_options,
        Some(platform::cisco_ios_xe()?),
        "configuration",
    )?;

    connection.open().await?;

    println!("connected, current prompt: {}", connection.get_prompt().await?);

    let show_results = connection
        .send_commands(&["show version".to_string(), "show ip interface brief".to_string()], true, false)
        .await?;
    print_results(&show_results);

    let config_results = connection
        .send_configs(&["interface loopback0".to_string(), "description managed by vtyshell".to_string()], true)
        .await?;
    print_results(&config_results);

    connection.acquire_privilege("privilegeExec").await?;
    println!("back at: {}", connection.get_prompt().await?);

    connection.close().await?;
    Ok(())
}
