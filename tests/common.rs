use uranium::ir::{BlockIndex, Context, FnIndex, Linkage, ModuleIndex};

/// A unit with a single exported `void main()` and no blocks yet.
#[derive(Debug)]
pub struct MainUnit {
    pub module: ModuleIndex,
    pub main_fn: FnIndex,
}

pub fn declare_main(ctx: &mut Context, unit_name: &str) -> MainUnit {
    let module = ctx.create_module(unit_name);
    let void = ctx.void_type();
    let main_ty = ctx
        .function_type(void, &[], false)
        .expect("void () is a valid function type");
    let main_fn = ctx
        .declare_function(module, "main", main_ty, Linkage::Exported)
        .expect("failed to declare main");

    MainUnit { module, main_fn }
}

#[allow(unused)] // not every test file appends blocks
pub fn entry_block(ctx: &mut Context, unit: &MainUnit) -> BlockIndex {
    ctx.append_block(unit.main_fn, Some("entry"))
        .expect("failed to create entry block")
}
