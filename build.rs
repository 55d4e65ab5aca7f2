use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=settings.json");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .unwrap();

    // Optional: the server falls back to defaults when the file is absent.
    if fs::metadata("settings.json").is_ok() {
        fs::copy("settings.json", target_dir.join("settings.json"))
            .expect("Failed to copy settings.json");
    }
}
