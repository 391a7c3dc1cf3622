//! The link-session context. One session owns every piece of mutable
//! backend state (tables, catalogs, stub groups, diagnostics) and is passed
//! explicitly into each phase; there is deliberately no module-level state
//! anywhere in this crate.

use crate::apply;
use crate::arch::PowerPcArch;
use crate::arena::BlockRef;
use crate::arena::ByteArena;
use crate::args::Power10Stubs;
use crate::args::SessionOptions;
use crate::artifacts::BackendArtifacts;
use crate::artifacts::DynamicRelocation;
use crate::artifacts::SyntheticSymbol;
use crate::attributes;
use crate::branches::BranchCatalog;
use crate::brlt::BranchLookupTable;
use crate::classify;
use crate::diagnostics::DiagnosticSink;
use crate::error::Result;
use crate::got::GotBuilder;
use crate::layout::OutputLayout;
use crate::layout::TableSizes;
use crate::model::AbiAttributes;
use crate::model::GlobalSymbol;
use crate::model::InputObject;
use crate::model::ObjectId;
use crate::model::SymbolId;
use crate::model::SymbolRef;
use crate::model::SymbolTable;
use crate::opd::FunctionDescriptorTable;
use crate::plt::PltBuilder;
use crate::plt::PltPool;
use crate::relax;
use crate::stub_group::CodeSectionRef;
use crate::stub_group::StubGroup;
use crate::stubs::StubContext;
use crate::stubs::StubTable;
use crate::tls_opt::TlsOptimizer;
use std::marker::PhantomData;

pub struct LinkSession<A: PowerPcArch> {
    pub options: SessionOptions,
    pub objects: Vec<InputObject>,
    pub symbols: SymbolTable,
    pub got: GotBuilder,
    pub plt: PltBuilder,
    pub branch_lookup: BranchLookupTable,
    pub function_descriptors: FunctionDescriptorTable,
    pub branches: BranchCatalog,
    pub tls: TlsOptimizer,
    pub diagnostics: DiagnosticSink,
    pub arena: ByteArena,
    pub code_order: Vec<CodeSectionRef>,
    pub groups: Vec<StubGroup>,
    pub stub_tables: Vec<StubTable>,
    pub stub_blocks: Vec<Option<BlockRef>>,
    pub layout: OutputLayout,
    /// Dynamic relocations against input sections (data words whose value
    /// is only known at load time).
    pub input_dynamic: Vec<DynamicRelocation>,
    /// Any input used prefixed pc-relative addressing, enabling POWER10
    /// stub forms under the `auto` policy.
    pub saw_pcrel_input: bool,
    merged_attributes: AbiAttributes,
    _arch: PhantomData<A>,
}

impl<A: PowerPcArch> LinkSession<A> {
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        let got = GotBuilder::new(A::WORD_BYTES, options.output_kind);
        let plt = PltBuilder::new(A::plt_slot_size(), options.output_kind);
        let branch_lookup = BranchLookupTable::new(options.output_kind);
        let tls = TlsOptimizer::new(
            options.tls_optimize,
            options.output_kind == crate::args::OutputKind::SharedObject,
        );
        Self {
            objects: Vec::new(),
            symbols: SymbolTable::new(),
            got,
            plt,
            branch_lookup,
            function_descriptors: FunctionDescriptorTable::new(),
            branches: BranchCatalog::new(),
            tls,
            diagnostics: DiagnosticSink::new(),
            arena: ByteArena::new(),
            code_order: Vec::new(),
            groups: Vec::new(),
            stub_tables: Vec::new(),
            stub_blocks: Vec::new(),
            layout: OutputLayout::default(),
            input_dynamic: Vec::new(),
            saw_pcrel_input: false,
            merged_attributes: AbiAttributes::default(),
            options,
            _arch: PhantomData,
        }
    }

    /// Adds a regular input object, merging its ABI attributes under the
    /// strict policy.
    pub fn add_object(&mut self, object: InputObject) -> Result<ObjectId> {
        attributes::merge::<A>(
            &mut self.merged_attributes,
            &object.attributes,
            &object.name,
            false,
            self.options.attribute_policy,
            &mut self.diagnostics,
        )?;
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(object);
        Ok(id)
    }

    /// Merges attribute metadata from a shared object; mismatches here only
    /// ever warn.
    pub fn add_shared_object_attributes(
        &mut self,
        attributes: &AbiAttributes,
        name: &str,
    ) -> Result {
        attributes::merge::<A>(
            &mut self.merged_attributes,
            attributes,
            name,
            true,
            self.options.attribute_policy,
            &mut self.diagnostics,
        )
    }

    pub fn add_symbol(&mut self, symbol: GlobalSymbol) -> SymbolId {
        self.symbols.add(symbol)
    }

    /// Records a dynamic relocation against an input section.
    pub(crate) fn dynamic_input_relocation(
        &mut self,
        object: ObjectId,
        section: usize,
        offset: u64,
        kind: ppclink_utils::elf::DynamicRelocationKind,
        symbol: Option<SymbolRef>,
        addend: i64,
    ) {
        self.input_dynamic.push(DynamicRelocation {
            target: crate::artifacts::RelocTarget::Input { object, section },
            offset,
            kind,
            symbol,
            addend,
        });
    }

    #[must_use]
    pub fn merged_attributes(&self) -> AbiAttributes {
        self.merged_attributes
    }

    #[must_use]
    pub fn use_p10_stubs(&self) -> bool {
        match self.options.power10_stubs {
            Power10Stubs::Yes => true,
            Power10Stubs::No => false,
            Power10Stubs::Auto => self.saw_pcrel_input,
        }
    }

    #[must_use]
    pub fn table_sizes(&self) -> TableSizes {
        TableSizes {
            got: self.got.size(),
            plt: self.plt.size(PltPool::Global),
            local_plt: self.plt.size(PltPool::Local),
            iplt: self.plt.size(PltPool::LocalIfunc),
            branch_lookup: self.branch_lookup.size(),
            function_descriptors: self.function_descriptors.size(),
        }
    }

    #[must_use]
    pub fn stub_context(&self) -> StubContext {
        StubContext {
            toc_base: self.layout.toc_base,
            plt_address: self.layout.plt_address,
            local_plt_address: self.layout.local_plt_address,
            iplt_address: self.layout.iplt_address,
            branch_lookup_address: self.layout.branch_lookup_address,
            abi: A::ABI,
            endian: A::ENDIAN,
            use_p10: self.use_p10_stubs(),
            thread_safe: self.options.plt_thread_safe,
        }
    }

    /// Recomputes the output layout from the current stub table sizes and
    /// pushes the new provisional base address into every table.
    pub fn refresh_layout(&mut self) {
        let stub_sizes: Vec<u64> = self.stub_tables.iter().map(StubTable::total_size).collect();
        self.layout = OutputLayout::compute::<A>(
            &self.objects,
            &self.code_order,
            &self.groups,
            &stub_sizes,
            self.table_sizes(),
            self.options.image_base,
        );
        for (table, &address) in self
            .stub_tables
            .iter_mut()
            .zip(&self.layout.stub_table_addresses)
        {
            table.set_base_address(address);
        }
    }

    /// Runs the whole backend: one classification pass, the relaxation
    /// driver, then the final apply/emit pass.
    pub fn link(&mut self) -> Result<BackendArtifacts> {
        classify::run::<A>(self)?;
        relax::run::<A>(self)?;
        apply::run::<A>(self)
    }

    /// Re-runs the relaxation driver on the already-classified state. A
    /// session that converged once must converge again with identical
    /// sizes.
    pub fn relax(&mut self) -> Result {
        relax::run::<A>(self)
    }

    /// Names for the generated stubs, for the output symbol table.
    #[must_use]
    pub fn synthetic_stub_symbols(&self) -> Vec<SyntheticSymbol> {
        let mut result = Vec::new();
        for table in &self.stub_tables {
            for stub in table.call_stubs() {
                let target = self.symbol_name_for_display(stub.key.symbol);
                result.push(SyntheticSymbol {
                    name: format!("__plt_call.{target}"),
                    address: table.base_address() + stub.offset,
                    size: stub.size,
                });
            }
            for stub in table.long_branch_stubs() {
                result.push(SyntheticSymbol {
                    name: format!("__long_branch.{:x}", stub.destination),
                    address: table.base_address() + stub.offset,
                    size: stub.size,
                });
            }
        }
        result
    }

    #[must_use]
    pub fn symbol_name_for_display(&self, symbol: SymbolRef) -> String {
        match symbol {
            SymbolRef::Global(id) => self.symbols.get(id).name.clone(),
            SymbolRef::Local { object, index } => {
                format!("{}:local.{index}", self.objects[object.as_usize()].name)
            }
        }
    }
}
