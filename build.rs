use std::io::Write;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=tests/fixtures");

    let out_dir = std::env::var("OUT_DIR").unwrap();
    let destination = Path::new(&out_dir).join("tests.rs");
    let mut f = std::fs::File::create(&destination).unwrap();

    let fixtures_dir = Path::new("tests/fixtures");
    let mut fixtures: Vec<_> = std::fs::read_dir(fixtures_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map(|s| s == "json").unwrap_or(false))
        .collect();
    fixtures.sort();

    for path in fixtures {
        let file_name = path.file_stem().unwrap().to_str().unwrap();
        let expected: i64 = file_name
            .split('_')
            .next_back()
            .unwrap()
            .parse()
            .expect("fixture file name must end with _<expected result>.json");

        writeln!(
            f,
            "fixture_test!({}, {:?}, {});",
            file_name,
            path.to_str().unwrap(),
            expected
        )
        .unwrap();
        println!("cargo:rerun-if-changed={}", path.display());
    }
}
