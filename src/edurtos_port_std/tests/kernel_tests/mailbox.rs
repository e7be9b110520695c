//! Mailboxes
use std::cell::{Cell, RefCell};

use edurtos_kernel::{
    InitMailboxError, Mailbox, ReadMailboxError, WriteMailboxError, INFINITE,
};
use edurtos_port_std::{boot, in_interrupt, set_task_script, with_cpu_lock};

use crate::{create_task, leak, new_kernel, System, TestKernel};

/// Construct a mailbox that can be shared with task scripts.
fn new_mailbox(capacity: usize) -> &'static Mailbox<'static, System> {
    let buffer: &'static mut [u32] = Box::leak(vec![0; capacity].into_boxed_slice());
    leak(Mailbox::new(buffer).unwrap())
}

fn booted_kernel() -> &'static TestKernel {
    let kernel = new_kernel();
    create_task(kernel, 1);
    boot(kernel);
    kernel
}

#[test]
fn messages_come_out_in_order() {
    let kernel = booted_kernel();
    let mut buffer = [0u32; 3];
    let mb = Mailbox::<System>::new(&mut buffer[..]).unwrap();

    assert_eq!(mb.capacity(), 3);
    assert_eq!(mb.is_empty(), Ok(true));

    for x in [10, 20, 30] {
        assert_eq!(mb.write(kernel, x, 0), Ok(()));
    }
    assert_eq!(mb.len(), Ok(3));
    assert_eq!(mb.is_full(), Ok(true));
    assert_eq!(mb.write(kernel, 40, 0), Err(WriteMailboxError::Timeout));

    assert_eq!(mb.read(kernel, 0), Ok(10));
    assert_eq!(mb.write(kernel, 50, 0), Ok(()));
    assert_eq!(mb.read(kernel, 0), Ok(20));
    assert_eq!(mb.read(kernel, 0), Ok(30));
    assert_eq!(mb.read(kernel, 0), Ok(50));
    assert_eq!(mb.read(kernel, 0), Err(ReadMailboxError::Timeout));
    assert_eq!(mb.is_empty(), Ok(true));
}

#[test]
fn messages_can_be_any_copy_type() {
    let kernel = booted_kernel();
    let mut buffer = [(0u8, '\0'); 2];
    let mb = Mailbox::<System, (u8, char)>::new(&mut buffer[..]).unwrap();

    mb.write(kernel, (1, 'a'), 0).unwrap();
    mb.write(kernel, (2, 'b'), 0).unwrap();
    assert_eq!(mb.read(kernel, 0), Ok((1, 'a')));
    assert_eq!(mb.read(kernel, 0), Ok((2, 'b')));
}

#[test]
fn empty_buffer_is_rejected() {
    let mut buffer: [u32; 0] = [];
    assert!(matches!(
        Mailbox::<System>::new(&mut buffer[..]),
        Err(InitMailboxError::BadParam)
    ));
}

#[test]
fn reader_blocks_until_a_message_arrives() {
    let kernel = new_kernel();
    let reader = create_task(kernel, 3);
    let writer = create_task(kernel, 1);
    boot(kernel);
    assert_eq!(kernel.running_task_id(), reader);

    let mb = new_mailbox(2);
    let next = leak(Cell::new(1));
    set_task_script(writer, move || {
        if next.get() <= 3 {
            mb.write(kernel, next.get() * 100, INFINITE).unwrap();
            next.set(next.get() + 1);
        }
    });

    for expected in [100, 200, 300] {
        assert_eq!(mb.read(kernel, INFINITE), Ok(expected));
    }
    assert_eq!(mb.len(), Ok(0));
}

#[test]
fn writer_blocks_while_the_mailbox_is_full() {
    let kernel = new_kernel();
    let writer = create_task(kernel, 3);
    let reader = create_task(kernel, 1);
    boot(kernel);
    assert_eq!(kernel.running_task_id(), writer);

    let mb = new_mailbox(2);
    let received = leak(RefCell::new(Vec::new()));
    set_task_script(reader, move || {
        if let Ok(x) = mb.read(kernel, 0) {
            received.borrow_mut().push(x);
        }
    });

    mb.write(kernel, 1, 0).unwrap();
    mb.write(kernel, 2, 0).unwrap();
    assert_eq!(mb.write(kernel, 3, INFINITE), Ok(()));

    assert_eq!(*received.borrow(), [1]);
    assert_eq!(mb.len(), Ok(2));
    assert_eq!(mb.read(kernel, 0), Ok(2));
    assert_eq!(mb.read(kernel, 0), Ok(3));
}

#[test]
fn mailbox_contexts() {
    let kernel = booted_kernel();
    let mut buffer = [0u32; 1];
    let mb = Mailbox::<System>::new(&mut buffer[..]).unwrap();

    assert_eq!(
        in_interrupt(|| mb.write(kernel, 1, 0)),
        Err(WriteMailboxError::BadContext)
    );
    assert_eq!(
        with_cpu_lock(|| mb.read(kernel, 0)),
        Err(ReadMailboxError::BadContext)
    );
    assert_eq!(mb.is_empty(), Ok(true));
    assert!(with_cpu_lock(|| mb.len()).is_err());
}
