//! Test utilities: program-tree fixtures and compile helpers.

#[cfg(test)]
pub mod utils {
    use crate::ast::{BinaryOp, NodeId, ProgramTree, TreeBuilder};
    use crate::preprocess::{CompiledPackage, NoImports, PackageGetter, PreprocessOptions, preprocess};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    /// Unique realm path per call, for tests sharing one store.
    pub fn unique_realm_path(prefix: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("gno.land/r/{prefix}/t{n}")
    }

    pub fn compile(tree: ProgramTree) -> CompiledPackage {
        preprocess(tree, &NoImports, PreprocessOptions::default()).expect("package should preprocess")
    }

    pub fn compile_with(tree: ProgramTree, getter: &dyn PackageGetter) -> Arc<CompiledPackage> {
        Arc::new(preprocess(tree, getter, PreprocessOptions::default()).expect("package should preprocess"))
    }

    /// Node ids of interest in [`loop_closures`].
    pub struct LoopClosures {
        pub tree: ProgramTree,
        pub loop_stmt: NodeId,
        pub lit: NodeId,
        pub z_def: NodeId,
        pub z_use: NodeId,
        pub i_read: NodeId,
        pub i_cond: NodeId,
    }

    /// ```text
    /// func Make() []func() int {
    ///     fs := []func() int{}
    ///     for i := 0; i < 3; i++ {
    ///         z := i
    ///         fs = append(fs, func() int { return z })   // or `return i`
    ///     }
    ///     return fs
    /// }
    /// ```
    pub fn loop_closures(pkg_path: &str, capture_loop_var: bool) -> LoopClosures {
        let mut b = TreeBuilder::new(pkg_path);
        let int1 = b.name("int");
        let fty = b.func_type(vec![], vec![int1]);
        let sty = b.slice_type(fty);
        let empty = b.composite(sty, vec![]);
        let fs = b.name("fs");
        let def_fs = b.define(vec![fs], vec![empty]);

        let i0 = b.name("i");
        let zero = b.int(0);
        let init = b.define(vec![i0], vec![zero]);
        let i_cond = b.name("i");
        let three = b.int(3);
        let cond = b.binary(i_cond, BinaryOp::Lss, three);
        let i2 = b.name("i");
        let post = b.inc(i2);

        let z_def = b.name("z");
        let i_read = b.name("i");
        let def_z = b.define(vec![z_def], vec![i_read]);

        let z_use = b.name(if capture_loop_var { "i" } else { "z" });
        let ret = b.ret(vec![z_use]);
        let int2 = b.name("int");
        let lit = b.func_lit(vec![], vec![int2], vec![ret]);
        let fs1 = b.name("fs");
        let app = b.call_name("append", vec![fs1, lit]);
        let fs2 = b.name("fs");
        let asg = b.assign(vec![fs2], vec![app]);
        let loop_stmt = b.for_loop(Some(init), Some(cond), Some(post), vec![def_z, asg]);

        let fs3 = b.name("fs");
        let ret_fs = b.ret(vec![fs3]);
        let int3 = b.name("int");
        let fty2 = b.func_type(vec![], vec![int3]);
        let sty2 = b.slice_type(fty2);
        let make = b.func_decl("Make", vec![], vec![sty2], vec![def_fs, loop_stmt, ret_fs]);
        let tree = b.finish("loops", vec![make]);
        LoopClosures {
            tree,
            loop_stmt,
            lit,
            z_def,
            z_use,
            i_read,
            i_cond,
        }
    }
}
