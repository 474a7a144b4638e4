//! Terminal output helpers.
//!
//! Every macro takes the message plus the `greppable` and `accessible` flags.
//! Greppable mode silences everything except the final port list; accessible
//! mode drops colours and symbols so screen readers get plain text.

/// Prints a warning prefixed with a red `[!]`.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
            }
        }
    };
}

/// Prints an informational line prefixed with a blue `[~]`.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
            }
        }
    };
}

/// Prints a result line prefixed with a green `[>]`.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::green("[>]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", colored::Colorize::bold(colored::Colorize::green("[>]")), $name);
            }
        }
    };
}
