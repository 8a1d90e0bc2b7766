use std::env;
use std::io::{self, Write};

use log::{info, warn};

use aerodb::error::DbError;
use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

const DEFAULT_DATABASE_FILE: &str = "data.aerodb";

fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_DATABASE_FILE.to_string());
    let mut table = match Table::open(&path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to open {path}: {e}");
            std::process::exit(1);
        }
    };
    info!("opened {path}. type .exit to quit.");

    loop {
        print!("aerodb> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case(".exit") {
            break;
        }

        if let Err(msg) = run_command(&mut table, line) {
            println!("error: {msg}");
        }
    }

    if let Err(e) = table.close() {
        warn!("error closing table: {e}");
    }
    info!("goodbye");
    Ok(())
}

fn run_command(table: &mut Table, line: &str) -> Result<(), String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");

    match command {
        "insert" => {
            let id = parse_id(parts.next())?;
            let username = parts.next().ok_or("usage: insert <id> <username> <email>")?;
            let email = parts.next().ok_or("usage: insert <id> <username> <email>")?;
            let record = Record::new(id, username, email).map_err(describe)?;
            table.insert(record).map_err(describe)?;
            println!("ok");
            Ok(())
        }
        "find" => {
            let id = parse_id(parts.next())?;
            match table.find(id).map_err(describe)? {
                Some(record) => println!("{} {} {}", record.id, record.username(), record.email()),
                None => println!("not found"),
            }
            Ok(())
        }
        "update" => {
            let id = parse_id(parts.next())?;
            let username = parts.next().ok_or("usage: update <id> <username> <email>")?;
            let email = parts.next().ok_or("usage: update <id> <username> <email>")?;
            let record = Record::new(id, username, email).map_err(describe)?;
            table.update(record).map_err(describe)?;
            println!("ok");
            Ok(())
        }
        "delete" => {
            let id = parse_id(parts.next())?;
            table.delete(id).map_err(describe)?;
            println!("ok");
            Ok(())
        }
        "scan" => {
            let mut count = 0;
            for result in table.scan().map_err(describe)? {
                let record = result.map_err(describe)?;
                println!("{} {} {}", record.id, record.username(), record.email());
                count += 1;
            }
            println!("{count} rows");
            Ok(())
        }
        "range" => {
            let lo = parse_id(parts.next())?;
            let hi = parse_id(parts.next())?;
            let mut count = 0;
            for result in table.range(lo, hi).map_err(describe)? {
                let record = result.map_err(describe)?;
                println!("{} {} {}", record.id, record.username(), record.email());
                count += 1;
            }
            println!("{count} rows");
            Ok(())
        }
        "validate" => {
            match table.validate_verbose() {
                Ok(()) => println!("ok"),
                Err(reason) => println!("invalid: {reason}"),
            }
            Ok(())
        }
        other => Err(format!("unknown command: {other}")),
    }
}

fn parse_id(arg: Option<&str>) -> Result<u32, String> {
    arg.ok_or_else(|| "expected an id".to_string())?
        .parse::<u32>()
        .map_err(|_| "id must be a non-negative integer".to_string())
}

fn describe(e: DbError) -> String {
    e.to_string()
}
