mod hypervisor_tests;
