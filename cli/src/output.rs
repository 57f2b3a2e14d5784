use colored::Colorize;

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn field(name: &str, value: &str) {
    println!("  {:<16} {}", format!("{name}:"), value.cyan());
}

pub fn hint(msg: &str) {
    println!("{} {}", "hint:".cyan().bold(), msg.dimmed());
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn denied(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_do_not_panic() {
        header("Client provisioned");
        field("client_id", "8c1b0c2e-4f3a-4b8e-9a51-2d7f0a6c9e10");
        hint("Store the key somewhere safe");
        warn("Pool not yet warm");
        success("Granted");
        denied("Denied");
    }
}
