use assert_cmd::Command;
use predicates::prelude::*;

fn blackout(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("blackout").expect("binary builds");
    cmd.env("BLACKOUT_DATA_DIR", data_dir);
    cmd
}

fn write_sample_png(path: &std::path::Path) {
    let image = image::RgbaImage::from_pixel(32, 16, image::Rgba([255, 255, 255, 255]));
    image.save(path).expect("sample image encodes");
}

#[test]
fn runs_with_no_arguments() {
    let dir = tempfile::tempdir().unwrap();
    blackout(dir.path()).assert().success();
}

#[test]
fn lists_opened_documents() {
    let dir = tempfile::tempdir().unwrap();
    let scan = dir.path().join("scan.png");
    write_sample_png(&scan);

    blackout(dir.path())
        .arg(&scan)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 page(s), raster image"));
}

#[test]
fn unreadable_files_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.pdf");

    blackout(dir.path()).arg(&missing).assert().success();
}

#[test]
fn opened_files_land_in_the_recent_list() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let scan = dir.path().join("scan.png");
    write_sample_png(&scan);

    blackout(&data).arg(&scan).assert().success();

    let recent = std::fs::read_to_string(data.join("recent.json")).expect("recent list saved");
    assert!(recent.contains("scan.png"), "recent list should mention the file: {recent}");
}
