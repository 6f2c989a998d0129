use crate::core::config::data::{path_display, Config};

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(unset)")
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!("  base-url: {}", or_unset(self.base_url.as_deref()));
        println!("  default-mode: {}", or_unset(self.default_mode.as_deref()));
        println!(
            "  mention-pattern: {}",
            or_unset(self.mention_pattern.as_deref())
        );
        match self.turn_timeout_secs {
            Some(secs) if secs > 0 => println!("  turn-timeout: {secs}s"),
            _ => println!("  turn-timeout: (none)"),
        }
        if self.gates.is_empty() {
            println!("  gate: (none set)");
        } else {
            println!("  gate:");
            for (mode, chain) in &self.gates {
                println!("    {mode}: {}", chain.join(" -> "));
            }
        }
        match &self.session_file {
            Some(path) => println!("  session-file: {}", path_display(path)),
            None => println!("  session-file: (default)"),
        }
        match &self.export_dir {
            Some(path) => println!("  export-dir: {}", path_display(path)),
            None => println!("  export-dir: (working directory)"),
        }
    }
}
