use std::{env, env::VarError};

/// The backend takes no arguments. Anything on the command line prints the help text instead.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Only these are printed. The merchant file may hold private keys, so its contents never are.
    const DISPLAY_ENVS: [&str; 9] = [
        "RUST_LOG",
        "MERCHANT_HOST",
        "MERCHANT_PORT",
        "MERCHANT_DATABASE_URL",
        "MERCHANT_CONFIG_FILE",
        "MERCHANT_MAX_DB_CONNECTIONS",
        "MERCHANT_EXCHANGE_TIMEOUT",
        "MERCHANT_KEYS_CACHE_TTL",
        "MERCHANT_HONOR_FORWARDED_HEADERS",
    ];

    println!("Current environment values:");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
