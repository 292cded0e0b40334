//! List commands implementation

use crate::programmers;

/// List all programmers compiled into this binary
pub fn list_programmers() {
    let available = programmers::available_programmers();

    println!("Supported programmers:");
    println!();
    if available.is_empty() {
        println!("  (none, recompile with programmer features enabled)");
        return;
    }
    for p in &available {
        if p.aliases.is_empty() {
            println!("  {:12} - {}", p.name, p.description);
        } else {
            println!(
                "  {:12} - {} [aliases: {}]",
                p.name,
                p.description,
                p.aliases.join(", ")
            );
        }
    }
}
