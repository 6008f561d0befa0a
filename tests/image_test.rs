mod common;
use common::*;
use qbasic::mach::{Image, ImageError, Runtime};

const PROGRAM: &str = "TYPE Point\n x AS SINGLE\n y AS SINGLE\nEND TYPE\nDIM p AS Point\nDIM big AS _INTEGER64\nbig = 9223372036854775807&&\nDATA 1, 2.5, \"three\"\nREAD a, b, c$\np.x = 1\nPRINT big; a; b; c$; p.x\nGOSUB Tail\nEND\nTail:\nRETURN\n";

/// Image write → read reproduces identical in-memory tables.
#[test]
fn test_image_round_trip() {
    let image = compile_ok(PROGRAM);
    let bytes = image.write_bytes();
    let reread = Image::read_bytes(&bytes).expect("image should load");
    assert_eq!(image, reread);
}

#[test]
fn test_int64_survives_constant_pool() {
    let image = compile_ok("big&& = 9223372036854775807&&\nPRINT big&&");
    let bytes = image.write_bytes();
    let reread = Image::read_bytes(&bytes).expect("image should load");
    assert!(reread
        .consts
        .iter()
        .any(|c| *c == qbasic::mach::Val::Int64(i64::MAX)));
}

#[test]
fn test_reread_image_runs_identically() {
    let image = compile_ok(PROGRAM);
    let reread = Image::read_bytes(&image.write_bytes()).expect("image should load");

    let mut host_a = TestHost::new();
    Runtime::new()
        .run(&image, &mut host_a, 0)
        .expect("original image runs");
    let mut host_b = TestHost::new();
    Runtime::new()
        .run(&reread, &mut host_b, 0)
        .expect("reread image runs");
    assert_eq!(host_a.transcript(), host_b.transcript());
}

#[test]
fn test_unknown_version_is_rejected() {
    let image = compile_ok("PRINT 1");
    let mut bytes = image.write_bytes();
    // Bump the version field in the fixed header.
    bytes[4] = 0xFF;
    assert_eq!(
        Image::read_bytes(&bytes).unwrap_err(),
        ImageError::UnsupportedImage
    );
}

#[test]
fn test_wrong_magic_is_rejected() {
    assert_eq!(
        Image::read_bytes(b"ELF\x7f____").unwrap_err(),
        ImageError::UnsupportedImage
    );
}

#[test]
fn test_truncated_image_is_rejected() {
    let image = compile_ok("PRINT 1");
    let bytes = image.write_bytes();
    let cut = &bytes[..bytes.len() / 2];
    assert!(matches!(
        Image::read_bytes(cut).unwrap_err(),
        ImageError::Truncated | ImageError::BadEncoding(_)
    ));
}

/// Every jump target in an emitted image lands inside the code stream.
#[test]
fn test_label_closure() {
    use qbasic::mach::Opcode;
    let image = compile_ok(PROGRAM);
    let len = image.code.len() as u32;
    for op in &image.code {
        let target = match op {
            Opcode::Jmp(a)
            | Opcode::JmpIfFalse(a)
            | Opcode::JmpIfTrue(a)
            | Opcode::Gosub(a)
            | Opcode::RetSubTo(a) => *a,
            Opcode::ForInit { exit, .. } => *exit,
            Opcode::ForStep { back, .. } => *back,
            _ => continue,
        };
        assert!(target <= len, "jump target {} out of range", target);
    }
    for (_, pc) in &image.labels {
        assert!(*pc <= len);
    }
}

/// The source map positions are sorted by pc.
#[test]
fn test_source_map_sorted() {
    let image = compile_ok(PROGRAM);
    let pcs: Vec<u32> = image.source_map.iter().map(|&(pc, _, _)| pc).collect();
    let mut sorted = pcs.clone();
    sorted.sort_unstable();
    assert_eq!(pcs, sorted);
}
