// generate_key.rs
// Utility to generate a TOKEN_ENCRYPTION_KEY for sealing provider tokens at rest

#[path = "services/encryption.rs"]
mod encryption;

use encryption::EncryptionService;

fn main() {
    println!("Generating new AES-256 encryption key...\n");

    let key = EncryptionService::generate_key();

    println!("Add this to your .env file:");
    println!("─────────────────────────────────────────────────");
    println!("TOKEN_ENCRYPTION_KEY={}", key);
    println!("─────────────────────────────────────────────────");
    println!("\nIMPORTANT:");
    println!("  • Keep this key secure and never commit it to version control");
    println!("  • If you lose this key, stored provider tokens cannot be decrypted");
    println!("    and every linked account has to reconnect");
}
