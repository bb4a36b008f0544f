use async_trait::async_trait;
use colored::Colorize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One entry of a role's operator command table, shown by `help`.
pub struct ConsoleCommand {
    pub name: &'static str,
    pub args: &'static str,
    pub help: &'static str,
}

/// What the REPL should do after a dispatched command.
pub enum ConsoleFlow {
    Continue,
    Exit,
}

/// A role's operator console: a closed command table plus a dispatcher.
/// `help` and `exit` are built in. Dispatch is fail-soft - an `Err` is
/// printed together with the help table and the loop keeps going.
#[async_trait]
pub trait Console {
    fn commands(&self) -> &'static [ConsoleCommand];

    async fn dispatch(&mut self, verb: &str, args: &[&str]) -> Result<ConsoleFlow, String>;
}

/// Reads operator lines from stdin until `exit` or end of input.
pub async fn run<C: Console + Send>(console: &mut C) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Ok(Some(line)) = lines.next_line().await {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if let Some((verb, args)) = tokens.split_first() {
            let verb = verb.to_ascii_uppercase();
            match verb.as_str() {
                "HELP" => print_help(console.commands()),
                "EXIT" => break,
                _ => match console.dispatch(&verb, args).await {
                    Ok(ConsoleFlow::Continue) => {}
                    Ok(ConsoleFlow::Exit) => break,
                    Err(message) => {
                        println!("{}", message.red());
                        print_help(console.commands());
                    }
                },
            }
        }
        prompt();
    }
}

fn prompt() {
    print!(">>> ");
    let _ = std::io::stdout().flush();
}

pub fn print_help(commands: &'static [ConsoleCommand]) {
    println!();
    for command in commands {
        if command.args.is_empty() {
            println!("    {}", command.name.yellow());
        } else {
            println!("    {} {}", command.name.yellow(), command.args);
        }
        println!("        {}", command.help);
    }
    println!("    {}", "HELP".yellow());
    println!("        Print this usage output.");
    println!("    {}", "EXIT".yellow());
    println!("        Terminate the program.");
    println!();
}

/// Argument helpers shared by the role consoles.
pub fn expect_args<'a>(
    verb: &str,
    args: &'a [&'a str],
    count: usize,
) -> Result<&'a [&'a str], String> {
    if args.len() == count {
        Ok(args)
    } else {
        Err(format!(
            "{verb} expects {count} argument(s), got {}",
            args.len()
        ))
    }
}

pub fn parse_port(text: &str) -> Result<u16, String> {
    text.parse::<u16>()
        .map_err(|_| format!("invalid port '{text}'"))
}

pub fn parse_seconds(text: &str) -> Result<i64, String> {
    text.parse::<i64>()
        .map_err(|_| format!("invalid duration '{text}'"))
}
