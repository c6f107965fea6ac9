// Prints an app_user INSERT for seeding staff accounts.
//
//   hashpass <email> <role> <display name> <password>
//
// role: admin | manager | dentist | receptionist

use anyhow::{Context, bail};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};

fn role_id(role: &str) -> anyhow::Result<i16> {
    Ok(match role.trim().to_lowercase().as_str() {
        "admin" => 1,
        "manager" => 2,
        "dentist" => 3,
        "receptionist" => 4,
        other => bail!("unknown role {other:?}; expected admin, manager, dentist or receptionist"),
    })
}

fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [email, role, display_name, password] = args.as_slice() else {
        bail!("usage: hashpass <email> <role> <display name> <password>");
    };

    let role = role_id(role)?;
    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("hashing password")?
        .to_string();

    println!(
        "INSERT INTO app_user (email, display_name, password_hash, roles) VALUES ({}, {}, {}, {role});",
        sql_literal(&email.trim().to_lowercase()),
        sql_literal(display_name.trim()),
        sql_literal(&phc),
    );
    Ok(())
}
