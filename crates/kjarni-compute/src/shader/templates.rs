//! Built-in kernel templates.
//!
//! Every storage input has its own binding index. Parameters, when a kernel
//! takes them, sit at the binding after the last tensor, matching the layout
//! `ComputeContext::create_kernel` builds.
//!
//! The context requests no optional device features, so these run at `f32`
//! precision. GELU and the MLP gate do their math in `f32` and convert on
//! load and store, but an `f16` build still needs `Features::SHADER_F16` and
//! an `enable f16;` directive in front of the source.

/// out[i] = gelu(inp[i]), tanh approximation.
///
/// Bindings: 0 `inp`, 1 `out`.
pub const GELU: &str = r#"
const GELU_SCALING_FACTOR: f32 = 0.7978845608028654; // sqrt(2.0 / PI)
@group(0) @binding(0) var<storage, read_write> inp: array<{{precision}}>;
@group(0) @binding(1) var<storage, read_write> out: array<{{precision}}>;
@compute @workgroup_size({{workgroupSize}})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i: u32 = gid.x;
    if (i < arrayLength(&inp)) {
        let x = f32(inp[i]);
        // Large inputs pass through; tanh saturates anyway.
        out[i] = {{precision}}(select(0.5 * x * (1.0 + tanh(GELU_SCALING_FACTOR
                 * (x + .044715 * x * x * x))), x, x > 10.0));
    }
}
"#;

/// out[i] = gated[i] * gelu(gate[i]).
///
/// Bindings: 0 `gate`, 1 `gated`, 2 `out`.
pub const MLP_GATE: &str = r#"
const GELU_SCALING_FACTOR: f32 = 0.7978845608028654; // sqrt(2.0 / PI)
@group(0) @binding(0) var<storage, read_write> gate: array<{{precision}}>;
@group(0) @binding(1) var<storage, read_write> gated: array<{{precision}}>;
@group(0) @binding(2) var<storage, read_write> out: array<{{precision}}>;
@compute @workgroup_size({{workgroupSize}})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i: u32 = gid.x;
    if (i < arrayLength(&gate)) {
        let x = f32(gate[i]);
        out[i] = {{precision}}(f32(gated[i]) * select(0.5 * x * (1.0 + tanh(GELU_SCALING_FACTOR
                 * (x + .044715 * x * x * x))), x, x > 10.0));
    }
}
"#;

/// out[i] = a[i] + b[i].
///
/// Bindings: 0 `a`, 1 `b`, 2 `out`.
pub const ADD: &str = r#"
@group(0) @binding(0) var<storage, read_write> a: array<{{precision}}>;
@group(0) @binding(1) var<storage, read_write> b: array<{{precision}}>;
@group(0) @binding(2) var<storage, read_write> out: array<{{precision}}>;
@compute @workgroup_size({{workgroupSize}})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i: u32 = gid.x;
    if (i < arrayLength(&out)) {
        out[i] = a[i] + b[i];
    }
}
"#;

/// out[i] = inp[i] * params.scale.
///
/// Bindings: 0 `inp`, 1 `out`, 2 uniform `params`.
pub const SCALE: &str = r#"
struct Params {
    scale: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};
@group(0) @binding(0) var<storage, read_write> inp: array<{{precision}}>;
@group(0) @binding(1) var<storage, read_write> out: array<{{precision}}>;
@group(0) @binding(2) var<uniform> params: Params;
@compute @workgroup_size({{workgroupSize}})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i: u32 = gid.x;
    if (i < arrayLength(&out)) {
        out[i] = inp[i] * params.scale;
    }
}
"#;

/// Row-major C = A x B with A: MxK, B: KxN.
///
/// `{{M}}`, `{{N}}` and `{{K}}` are caller tokens; fill them with
/// [`crate::shader::substitute`] before resolving the template. The workgroup
/// is expected to be `{TILE, TILE, 1}` with `{{tile}}` set to the same TILE.
///
/// Bindings: 0 `A`, 1 `B`, 2 `C`.
pub const MATMUL_TILED: &str = r#"
const M: u32 = {{M}}u;
const N: u32 = {{N}}u;
const K: u32 = {{K}}u;
const TILE: u32 = {{tile}}u;
@group(0) @binding(0) var<storage, read_write> A: array<{{precision}}>;
@group(0) @binding(1) var<storage, read_write> B: array<{{precision}}>;
@group(0) @binding(2) var<storage, read_write> C: array<{{precision}}>;
var<workgroup> tileA: array<{{precision}}, {{tileArea}}>;
var<workgroup> tileB: array<{{precision}}, {{tileArea}}>;
@compute @workgroup_size({{workgroupSize}})
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>
) {
    let row = gid.y;
    let col = gid.x;
    var acc: {{precision}} = 0.0;
    let tiles = (K + TILE - 1u) / TILE;
    for (var t = 0u; t < tiles; t = t + 1u) {
        let a_col = t * TILE + lid.x;
        let b_row = t * TILE + lid.y;
        var a_val: {{precision}} = 0.0;
        var b_val: {{precision}} = 0.0;
        if (row < M && a_col < K) {
            a_val = A[row * K + a_col];
        }
        if (b_row < K && col < N) {
            b_val = B[b_row * N + col];
        }
        tileA[lid.y * TILE + lid.x] = a_val;
        tileB[lid.y * TILE + lid.x] = b_val;
        workgroupBarrier();
        for (var k = 0u; k < TILE; k = k + 1u) {
            acc = acc + tileA[lid.y * TILE + k] * tileB[k * TILE + lid.x];
        }
        workgroupBarrier();
    }
    if (row < M && col < N) {
        C[row * N + col] = acc;
    }
}
"#;

/// Fills the caller tokens of [`MATMUL_TILED`].
pub fn matmul_tiled(m: usize, n: usize, k: usize, tile: usize) -> String {
    let (m, n, k) = (m.to_string(), n.to_string(), k.to_string());
    let area = (tile * tile).to_string();
    let tile = tile.to_string();
    crate::shader::substitute(
        MATMUL_TILED,
        &[
            ("{{M}}", &m),
            ("{{N}}", &n),
            ("{{K}}", &k),
            ("{{tile}}", &tile),
            ("{{tileArea}}", &area),
        ],
    )
}
