//! # Padron DB CLI
//!
//! An interactive menu front-end for the citizen store: point operations
//! plus a random bulk load for benchmarking, driven from stdin.

use std::env;
use std::io::{self, BufRead, Write};
use std::time::Instant;

use log::info;
use padron::{datagen, Citizen, Database, Dni};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: padron <database-file>");
        std::process::exit(2);
    }

    println!("Padron DB v{}", env!("CARGO_PKG_VERSION"));
    println!("Database file: {}", args[1]);

    let mut db = match Database::open(&args[1]) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("error opening database: {e}");
            std::process::exit(1);
        }
    };

    loop {
        print_menu();
        let Some(choice) = read_line("> ") else { break };

        let result = match choice.trim() {
            "1" => insert_citizen(&mut db),
            "2" => find_citizen(&mut db),
            "3" => update_citizen(&mut db),
            "4" => delete_citizen(&mut db),
            "5" => bulk_load(&mut db),
            "6" | "q" | "quit" | "exit" => break,
            "" => Ok(()),
            other => {
                println!("unknown option: {other}");
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("error: {e}");
        }
    }

    if let Err(e) = db.close() {
        eprintln!("error closing database: {e}");
        std::process::exit(1);
    }
}

fn print_menu() {
    println!();
    println!("========== Padron DB -- citizen registry ==========");
    println!("1. Insert citizen");
    println!("2. Find citizen by DNI");
    println!("3. Update citizen");
    println!("4. Delete citizen");
    println!("5. Bulk load random data");
    println!("6. Exit");
    println!("==================================================");
}

/// Print `prompt`, then read one line. `None` on EOF.
fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    io::stdout().flush().ok()?;

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end().to_string()),
    }
}

/// Prompt until the user enters a valid DNI. `None` on EOF.
fn read_dni(prompt: &str) -> Option<Dni> {
    loop {
        let line = read_line(prompt)?;
        match line.trim().parse::<Dni>() {
            Ok(dni) => return Some(dni),
            Err(_) => println!("a DNI is a number up to 8 digits, try again"),
        }
    }
}

fn read_citizen_fields(dni: Dni) -> Option<Citizen> {
    let given_names = read_line("Given names: ")?;
    let surnames = read_line("Surnames: ")?;
    let address = read_line("Address: ")?;
    Some(Citizen::new(dni, given_names, surnames, address))
}

fn insert_citizen(db: &mut Database) -> padron::Result<()> {
    println!("--- Insert citizen ---");
    let Some(dni) = read_dni("DNI: ") else { return Ok(()) };
    let Some(citizen) = read_citizen_fields(dni) else { return Ok(()) };

    if db.insert(&citizen)? {
        println!("citizen inserted");
    } else {
        println!("a citizen with DNI {dni} already exists");
    }
    Ok(())
}

fn find_citizen(db: &mut Database) -> padron::Result<()> {
    println!("--- Find citizen ---");
    let Some(dni) = read_dni("DNI: ") else { return Ok(()) };

    match db.find(dni)? {
        Some(c) => {
            println!("DNI:         {}", c.dni);
            println!("Given names: {}", c.given_names);
            println!("Surnames:    {}", c.surnames);
            println!("Address:     {}", c.address);
        }
        None => println!("no citizen with DNI {dni}"),
    }
    Ok(())
}

fn update_citizen(db: &mut Database) -> padron::Result<()> {
    println!("--- Update citizen ---");
    let Some(dni) = read_dni("DNI of the citizen to update: ") else { return Ok(()) };

    if db.find(dni)?.is_none() {
        println!("no citizen with DNI {dni}");
        return Ok(());
    }
    let Some(citizen) = read_citizen_fields(dni) else { return Ok(()) };

    if db.update(&citizen)? {
        println!("citizen updated");
    } else {
        println!("update rejected: the new record is larger than the stored one");
    }
    Ok(())
}

fn delete_citizen(db: &mut Database) -> padron::Result<()> {
    println!("--- Delete citizen ---");
    let Some(dni) = read_dni("DNI: ") else { return Ok(()) };

    if db.delete(dni)? {
        println!("citizen deleted");
    } else {
        println!("no citizen with DNI {dni}");
    }
    Ok(())
}

fn bulk_load(db: &mut Database) -> padron::Result<()> {
    println!("--- Bulk load ---");
    let Some(line) = read_line("How many records? ") else { return Ok(()) };
    let count: u64 = match line.trim().parse() {
        Ok(n) if n > 0 => n,
        _ => {
            println!("the count must be a positive number");
            return Ok(());
        }
    };

    let mut rng = rand::thread_rng();
    let started = Instant::now();
    let mut inserted: u64 = 0;
    let mut duplicates: u64 = 0;

    for i in 0..count {
        let citizen = datagen::random_citizen(&mut rng);
        if db.insert(&citizen)? {
            inserted += 1;
        } else {
            duplicates += 1;
        }

        if (i + 1) % 100_000 == 0 {
            println!("  {} / {count}", i + 1);
        }
    }

    let elapsed = started.elapsed();
    let rate = inserted as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!("bulk load: {inserted} inserted, {duplicates} duplicate DNIs skipped");
    println!(
        "inserted {inserted} records in {:.2?} ({rate:.0} inserts/sec), {duplicates} duplicates",
        elapsed
    );
    Ok(())
}
