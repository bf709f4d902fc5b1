use std::fs;
use std::path::Path;

/// Regenerate `cl-graph/src/onnx/proto.rs` from `cl-graph/proto/onnx.proto3`.
///
/// Run from the workspace root with `protoc` on the path.
fn main() -> std::io::Result<()> {
    let crate_dir = Path::new("cl-graph");
    let proto_dir = crate_dir.join("proto");
    let proto = proto_dir.join("onnx.proto3");
    if !proto.is_file() {
        eprintln!("Could not find {:?}, run this from the workspace root", proto);
        std::process::exit(1);
    }

    let out_dir = crate_dir.join("src").join("onnx");
    prost_build::Config::new()
        .out_dir(&out_dir)
        .compile_protos(&[&proto], &[&proto_dir])?;

    // prost names the file after the proto package
    let generated = out_dir.join("onnx.rs");
    let target = out_dir.join("proto.rs");
    fs::rename(&generated, &target)?;

    println!("Generated {:?}", target);
    Ok(())
}
