use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=src/detectors/");

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let detectors_dir = Path::new(&manifest_dir).join("src/detectors");

    let mut modules: Vec<String> = fs::read_dir(&detectors_dir)
        .expect("src/detectors/ directory not found")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| e.path().join("mod.rs").exists())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    modules.sort();

    let content: String = modules
        .iter()
        .map(|m| {
            let detector_path = detectors_dir.join(m).join("mod.rs");
            format!("#[path = {:?}]\npub(crate) mod {};\n", detector_path, m)
        })
        .collect();

    let out_dir = std::env::var("OUT_DIR").unwrap();
    let dest = Path::new(&out_dir).join("detector_modules.rs");
    fs::write(dest, content).unwrap();
}
