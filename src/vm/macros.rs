#[macro_export]
macro_rules! vm_info {
    ($src:expr, $($format:tt)*) => {
        if $src.tracer_enabled() {
            $src.tracer().msg($crate::vm::tracer::TraceLevel::Info, $src.indent(), format_args!($($format)*))
        }
    }
}

#[macro_export]
macro_rules! vm_trace_instruction {
    ($src:expr, $ip:expr, $instr:expr) => {
        if $src.tracer_enabled() {
            $src.tracer().trace_instruction($src.indent(), $ip, &$instr.to_string());
        }
    };
}

#[macro_export]
macro_rules! vm_trace_call {
    ($src:expr, $name:expr, $args:expr) => {
        if $src.tracer_enabled() {
            $src.tracer().trace_call($src.indent(), $name, $args);
        }
    };
}

#[macro_export]
macro_rules! vm_trace_return {
    ($src:expr, $name:expr) => {
        if $src.tracer_enabled() {
            $src.tracer().trace_return($src.indent(), $name);
        }
    };
}

#[macro_export]
macro_rules! vm_trace_branch {
    ($src:expr, $op:expr, $target:expr, $taken:expr) => {
        if $src.tracer_enabled() {
            $src.tracer()
                .trace_branch($src.indent(), $op.name(), $target, $taken);
        }
    };
}

#[macro_export]
macro_rules! vm_trace_allocation {
    ($src:expr, $kind:expr, $address:expr, $size:expr) => {
        if $src.tracer_enabled() {
            $src.tracer()
                .trace_allocation($src.indent(), $kind, $address.as_u64(), $size);
        }
    };
}

#[macro_export]
macro_rules! vm_trace_gc {
    ($src:expr, $event:expr, $($details:tt)*) => {
        if $src.tracer_enabled() {
            $src.tracer()
                .trace_gc_event($src.indent(), $event, &format!($($details)*));
        }
    };
}

#[macro_export]
macro_rules! vm_trace_fault {
    ($src:expr, $fault:expr, $location:expr) => {
        if $src.tracer_enabled() {
            $src.tracer()
                .trace_fault($src.indent(), &$fault.to_string(), &$location.to_string());
        }
    };
}

#[macro_export]
macro_rules! vm_trace_stack_snapshot {
    ($src:expr) => {
        if $src.tracer_enabled() {
            $src.trace_dump_stack();
        }
    };
}

#[macro_export]
macro_rules! vm_trace_heap_snapshot {
    ($src:expr) => {
        if $src.tracer_enabled() {
            $src.trace_dump_heap();
        }
    };
}

/// Pop several values off the evaluation stack, propagating underflow.
///
/// Names are listed in stack order, top of stack first:
/// ```ignore
/// pop_args!(self, [value, index, array]);
/// ```
#[macro_export]
macro_rules! pop_args {
    ($vm:expr, [ $($name:ident),+ $(,)? ]) => {
        $(
            let $name = $vm.state.stack.pop()?;
        )+
    };
}
