//! `agentform seed`

use rand::Rng;
use rand::seq::IndexedRandom;

use agentform_core::FormId;
use agentform_infra::services::AppServices;

const FIRST_NAMES: [&str; 10] = [
    "Ada", "Alan", "Barbara", "Dennis", "Edsger", "Frances", "Grace", "Ken", "Margaret", "Niklaus",
];
const LAST_NAMES: [&str; 10] = [
    "Allen", "Dijkstra", "Hamilton", "Hopper", "Kernighan", "Liskov", "Lovelace", "Ritchie",
    "Turing", "Wirth",
];
const SECRET_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

pub struct SampleForm {
    pub name: String,
    pub email: String,
    pub secret: String,
}

/// A random submission with an email unlikely to collide with earlier seeds.
pub fn sample_form(rng: &mut impl Rng) -> SampleForm {
    let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Ada");
    let last = LAST_NAMES.choose(rng).copied().unwrap_or("Lovelace");
    let tag: u32 = rng.random_range(0..1_000_000);
    let secret: String = (0..10)
        .map(|_| SECRET_CHARS[rng.random_range(0..SECRET_CHARS.len())] as char)
        .collect();

    SampleForm {
        name: format!("{first} {last}"),
        email: format!(
            "{}.{}{}@example.com",
            first.to_lowercase(),
            last.to_lowercase(),
            tag
        ),
        secret,
    }
}

pub async fn run(services: &AppServices, count: usize) -> anyhow::Result<()> {
    let before = services.form_service.statistics().await?;
    println!("Creating {count} form(s) and queueing verification...");

    let mut created: Vec<FormId> = Vec::with_capacity(count);
    for i in 0..count {
        let input = sample_form(&mut rand::rng());
        match services
            .form_service
            .submit(&input.name, &input.email, &input.secret)
            .await
        {
            Ok(form) => created.push(form.id),
            Err(e) => eprintln!("✗ Failed to create form {i}: {e}"),
        }
    }

    let after = services.form_service.statistics().await?;
    println!("✓ Created {} form(s)", created.len());
    if !created.is_empty() {
        let ids: Vec<String> = created.iter().map(|id| id.to_string()).collect();
        println!("  Form ids: {}", ids.join(", "));
    }
    println!(
        "  Total forms: {} (+{})",
        after.total,
        after.total.saturating_sub(before.total)
    );
    println!("\nProcess the queues with: agentform work");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentform_core::NewAgentForm;

    #[test]
    fn sample_forms_pass_validation() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let form = sample_form(&mut rng);
            NewAgentForm::new(&form.name, &form.email, &form.secret).unwrap();
        }
    }
}
