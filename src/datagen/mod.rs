//! Random citizen generation for bulk loading and benchmarks.
//!
//! Produces plausible Peruvian records: names and surnames drawn from small
//! pools, an address built from a street and a house number, and a DNI
//! drawn uniformly from the 8-digit range. Collisions are expected at large
//! volumes; bulk loaders count them as duplicates rather than retrying.

use rand::Rng;

use crate::types::{Citizen, Dni};

const GIVEN_NAMES: &[&str] = &[
    "Juan", "Maria", "Carlos", "Ana", "Luis", "Rosa", "Jorge", "Carmen", "Pedro", "Lucia",
    "Miguel", "Sofia", "Jose", "Isabel", "Ricardo", "Elena", "Fernando", "Patricia", "Roberto",
    "Teresa", "Alberto", "Laura", "Manuel", "Gloria", "Antonio", "Marta", "Francisco", "Diana",
    "Diego", "Sandra",
];

const SURNAMES: &[&str] = &[
    "Garcia", "Rodriguez", "Martinez", "Fernandez", "Lopez", "Gonzalez", "Sanchez", "Perez",
    "Gomez", "Torres", "Ramirez", "Flores", "Rivera", "Silva", "Mendoza", "Castro", "Chavez",
    "Rojas", "Vargas", "Herrera", "Morales", "Cruz", "Reyes", "Jimenez", "Diaz", "Romero",
    "Gutierrez", "Ruiz", "Alvarez", "Castillo",
];

const STREETS: &[&str] = &[
    "Av. Arequipa",
    "Av. Brasil",
    "Jr. Lampa",
    "Av. Petit Thouars",
    "Av. Javier Prado",
    "Av. La Marina",
    "Jr. Carabaya",
    "Av. Venezuela",
    "Av. Universitaria",
    "Av. Abancay",
    "Jr. Union",
    "Av. Colonial",
    "Av. Angamos",
    "Av. Salaverry",
    "Av. Tacna",
    "Av. Alfonso Ugarte",
];

/// A DNI drawn uniformly from the 8-digit range.
pub fn random_dni(rng: &mut impl Rng) -> Dni {
    rng.gen_range(10_000_000..=99_999_999)
}

/// A citizen with a random DNI, one given name, two surnames, and a street
/// address.
pub fn random_citizen(rng: &mut impl Rng) -> Citizen {
    let given = GIVEN_NAMES[rng.gen_range(0..GIVEN_NAMES.len())];
    let first = SURNAMES[rng.gen_range(0..SURNAMES.len())];
    let second = SURNAMES[rng.gen_range(0..SURNAMES.len())];
    let street = STREETS[rng.gen_range(0..STREETS.len())];
    let number = rng.gen_range(100..=9999);

    Citizen::new(
        random_dni(rng),
        given,
        format!("{first} {second}"),
        format!("{street} {number}"),
    )
}
